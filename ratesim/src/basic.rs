//! Sender with no flow control: every generated message goes straight to
//! the wire. Aggregate load is bounded only by the injection rate.

use ratedes::Context;

use crate::actor::NodeEvent;
use crate::sender::SenderCore;

pub struct BasicSender {
    pub sender: SenderCore,
}

impl BasicSender {
    pub fn new(sender: SenderCore) -> Self {
        Self { sender }
    }

    pub fn handle_generate(&mut self, ctx: &mut Context<'_, NodeEvent>) {
        let msg = self.sender.generate(ctx);
        self.sender.core.send(ctx, msg);
    }
}
