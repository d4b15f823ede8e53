use std::sync::{Arc, Mutex};

/// A process-wide slot that holds at most one live instance.
///
/// The HTTP handler dispatch gives us no per-request context, so handlers
/// reach the live [`crate::SetupSession`] through a static slot. Making
/// the slot an explicit attach/detach registry turns the single-instance
/// rule into a checked precondition: attaching while occupied, detaching
/// with the wrong reference, or using an empty slot all abort.
pub struct SingleSlot<T> {
    slot: Mutex<Option<Arc<T>>>,
}

impl<T> SingleSlot<T> {
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Registers `value` as the live instance. Fatal if one is already
    /// registered.
    pub fn attach(&self, value: Arc<T>) {
        let mut slot = self.slot.lock().unwrap();
        if slot.is_some() {
            panic!("attach called while another instance is registered");
        }
        *slot = Some(value);
    }

    /// Unregisters the live instance. Fatal if the slot is empty or
    /// `value` is not the registered instance.
    pub fn detach(&self, value: &Arc<T>) {
        let mut slot = self.slot.lock().unwrap();
        match slot.take() {
            Some(active) if Arc::ptr_eq(&active, value) => {}
            Some(_) => panic!("detach called with a mismatched instance reference"),
            None => panic!("detach called with no instance registered"),
        }
    }

    /// Returns the live instance. Fatal if the slot is empty.
    pub fn active(&self) -> Arc<T> {
        self.try_active()
            .expect("no instance registered in the slot")
    }

    pub fn try_active(&self) -> Option<Arc<T>> {
        self.slot.lock().unwrap().clone()
    }
}

impl<T> Default for SingleSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attach_active_detach_round_trip() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        assert!(slot.try_active().is_none());

        let value = Arc::new(7);
        slot.attach(value.clone());
        assert!(Arc::ptr_eq(&slot.active(), &value));

        slot.detach(&value);
        assert!(slot.try_active().is_none());

        // The slot is reusable after a clean detach.
        let next = Arc::new(8);
        slot.attach(next.clone());
        slot.detach(&next);
    }

    #[test]
    #[should_panic(expected = "another instance is registered")]
    fn double_attach_is_fatal() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        slot.attach(Arc::new(1));
        slot.attach(Arc::new(2));
    }

    #[test]
    #[should_panic(expected = "mismatched instance reference")]
    fn detach_with_wrong_reference_is_fatal() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        slot.attach(Arc::new(1));
        slot.detach(&Arc::new(1));
    }

    #[test]
    #[should_panic(expected = "no instance registered")]
    fn detach_on_empty_slot_is_fatal() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        slot.detach(&Arc::new(1));
    }

    #[test]
    #[should_panic(expected = "no instance registered")]
    fn active_on_empty_slot_is_fatal() {
        let slot: SingleSlot<u32> = SingleSlot::new();
        let _ = slot.active();
    }
}
