/// A single event-handler property on some target, e.g. `onended` on an
/// `<audio>` element.
pub trait HandlerSlot<H> {
    fn attach(&self, handler: &H);
    /// Whether `handler` is the one currently installed.
    fn holds(&self, handler: &H) -> bool;
    fn detach(&self);
}

/// Keeps `handler` alive while it is installed in `slot`.
///
/// Dropping the guard uninstalls the handler, so an aborted wait never
/// leaves a freed callback registered. A slot that has since been taken
/// over by another handler is left alone.
pub struct Registered<S: HandlerSlot<H>, H> {
    slot: S,
    handler: H,
}

impl<S: HandlerSlot<H>, H> Registered<S, H> {
    pub fn new(slot: S, handler: H) -> Self {
        slot.attach(&handler);
        Self { slot, handler }
    }
}

impl<S: HandlerSlot<H>, H> Drop for Registered<S, H> {
    fn drop(&mut self) {
        if self.slot.holds(&self.handler) {
            self.slot.detach();
        }
    }
}
