//! Ein-Element-Puffer fuer aufgeschobene Ereignisse
//!
//! Haelt hoechstens einen Wert. Ein neuer Wert ersetzt den alten
//! (most-recent-wins), Entnehmen leert den Puffer.

#[derive(Debug)]
pub struct PendingSlot<T> {
    wert: Option<T>,
}

impl<T> PendingSlot<T> {
    pub fn new() -> Self {
        Self { wert: None }
    }

    /// Legt einen Wert ab und gibt einen verdraengten zurueck
    pub fn ablegen(&mut self, wert: T) -> Option<T> {
        self.wert.replace(wert)
    }

    /// Entnimmt den Wert
    pub fn nehmen(&mut self) -> Option<T> {
        self.wert.take()
    }

    pub fn ansehen(&self) -> Option<&T> {
        self.wert.as_ref()
    }

    pub fn ist_belegt(&self) -> bool {
        self.wert.is_some()
    }

    pub fn verwerfen(&mut self) {
        self.wert = None;
    }
}

impl<T> Default for PendingSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
