//! Klassifizierung des Verbindungswegs
//!
//! Rein informativ fuer die Oberflaeche, blockiert nie die Zustellung.

use std::net::IpAddr;

use crate::transport::{CandidatePair, KandidatInfo, KandidatTyp};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPath {
    /// Beide Seiten im selben lokalen Netz
    DirectLocal,
    /// Direkt, aber ueber NAT/Internet
    DirectNat,
    /// Ueber einen TURN-Server
    Relayed { relay: Option<String> },
    /// Ungewoehnliche Kandidaten-Kombination, vermutlich Tunnel
    PossiblyVpn,
    Undetermined,
}

impl ConnectionPath {
    /// Label fuer Metriken und Logs
    pub fn label(&self) -> &'static str {
        match self {
            Self::DirectLocal => "direct_local",
            Self::DirectNat => "direct_nat",
            Self::Relayed { .. } => "relayed",
            Self::PossiblyVpn => "possibly_vpn",
            Self::Undetermined => "undetermined",
        }
    }

    pub fn ist_bestimmt(&self) -> bool {
        !matches!(self, Self::Undetermined)
    }
}

pub fn klassifizieren(paar: Option<&CandidatePair>) -> ConnectionPath {
    let Some(paar) = paar else {
        return ConnectionPath::Undetermined;
    };
    let (lokal, remote) = (&paar.lokal, &paar.remote);

    if lokal.typ == KandidatTyp::Relay || remote.typ == KandidatTyp::Relay {
        let relay = lokal.relay.clone().or_else(|| remote.relay.clone());
        return ConnectionPath::Relayed { relay };
    }

    // Unterschiedliche Adressfamilien oder Carrier-Grade-NAT deuten auf einen Tunnel
    if lokal.adresse.is_ipv4() != remote.adresse.is_ipv4()
        || ist_cgnat(&lokal.adresse)
        || ist_cgnat(&remote.adresse)
    {
        return ConnectionPath::PossiblyVpn;
    }

    match (lokal.typ, remote.typ) {
        (KandidatTyp::Host, KandidatTyp::Host) => host_paar(lokal, remote),
        _ => ConnectionPath::DirectNat,
    }
}

fn host_paar(lokal: &KandidatInfo, remote: &KandidatInfo) -> ConnectionPath {
    match (ist_privat(&lokal.adresse), ist_privat(&remote.adresse)) {
        (true, true) => ConnectionPath::DirectLocal,
        (false, false) => ConnectionPath::DirectNat,
        // Host-Kandidat privat auf der einen, oeffentlich auf der anderen Seite
        _ => ConnectionPath::PossiblyVpn,
    }
}

/// RFC 1918, Link-Local, Loopback und IPv6 ULA
fn ist_privat(adresse: &IpAddr) -> bool {
    match adresse {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_loopback(),
        IpAddr::V6(v6) => {
            let erstes = v6.segments()[0];
            v6.is_loopback() || (erstes & 0xfe00) == 0xfc00 || (erstes & 0xffc0) == 0xfe80
        }
    }
}

/// 100.64.0.0/10
fn ist_cgnat(adresse: &IpAddr) -> bool {
    match adresse {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            o[0] == 100 && (o[1] & 0xc0) == 64
        }
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kandidat(typ: KandidatTyp, adresse: &str) -> KandidatInfo {
        KandidatInfo {
            typ,
            adresse: adresse.parse().unwrap(),
            port: 50000,
            relay: None,
        }
    }

    fn paar(lokal: KandidatInfo, remote: KandidatInfo) -> CandidatePair {
        CandidatePair { lokal, remote }
    }

    #[test]
    fn ohne_statistik_unbestimmt() {
        assert_eq!(klassifizieren(None), ConnectionPath::Undetermined);
    }

    #[test]
    fn zwei_private_hosts_sind_lokal() {
        let p = paar(
            kandidat(KandidatTyp::Host, "192.168.1.10"),
            kandidat(KandidatTyp::Host, "192.168.1.20"),
        );
        assert_eq!(klassifizieren(Some(&p)), ConnectionPath::DirectLocal);
    }

    #[test]
    fn srflx_ist_nat() {
        let p = paar(
            kandidat(KandidatTyp::Srflx, "203.0.113.5"),
            kandidat(KandidatTyp::Prflx, "198.51.100.7"),
        );
        assert_eq!(klassifizieren(Some(&p)), ConnectionPath::DirectNat);
    }

    #[test]
    fn relay_nennt_server() {
        let mut lokal = kandidat(KandidatTyp::Relay, "203.0.113.5");
        lokal.relay = Some("turn.example.org".into());
        let p = paar(lokal, kandidat(KandidatTyp::Srflx, "198.51.100.7"));
        assert_eq!(
            klassifizieren(Some(&p)),
            ConnectionPath::Relayed {
                relay: Some("turn.example.org".into())
            }
        );
    }

    #[test]
    fn cgnat_ist_vielleicht_vpn() {
        let p = paar(
            kandidat(KandidatTyp::Host, "100.101.1.2"),
            kandidat(KandidatTyp::Srflx, "198.51.100.7"),
        );
        assert_eq!(klassifizieren(Some(&p)), ConnectionPath::PossiblyVpn);
        // 100.128.0.0 liegt ausserhalb von /10
        assert!(!ist_cgnat(&"100.128.0.1".parse().unwrap()));
    }

    #[test]
    fn gemischte_host_adressen_sind_vielleicht_vpn() {
        let p = paar(
            kandidat(KandidatTyp::Host, "10.0.0.2"),
            kandidat(KandidatTyp::Host, "198.51.100.7"),
        );
        assert_eq!(klassifizieren(Some(&p)), ConnectionPath::PossiblyVpn);
    }

    #[test]
    fn gemischte_adressfamilien_sind_vielleicht_vpn() {
        let p = paar(
            kandidat(KandidatTyp::Srflx, "203.0.113.5"),
            kandidat(KandidatTyp::Srflx, "2001:db8::1"),
        );
        assert_eq!(klassifizieren(Some(&p)), ConnectionPath::PossiblyVpn);
    }

    #[test]
    fn ula_ist_privat() {
        assert!(ist_privat(&"fd12:3456::1".parse().unwrap()));
        assert!(ist_privat(&"fe80::1".parse().unwrap()));
        assert!(!ist_privat(&"2001:db8::1".parse().unwrap()));
    }
}
