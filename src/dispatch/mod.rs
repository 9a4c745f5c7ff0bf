//! Notification dispatch gateway (EMBP).
//!
//! Siblings stay private; callers import the channel traits, the stock
//! channel implementations and the dispatcher from here.

mod channels;
mod dispatcher;

pub use channels::{
    HttpPushChannel, InboxChannel, LocalChannel, PresentedNotification, RegistrationToken,
    RemoteChannel,
};
pub use dispatcher::{Delivery, DispatchPolicy, NotificationDispatcher};
