//! Domain model of the notification dispatch core.

pub mod contact;
pub mod delivery;
pub mod event;
pub mod notification;
pub mod state;
pub mod subscription;
pub mod trigger;

pub use contact::ContactData;
pub use delivery::{DeliveryCheckData, DeliveryCheckKey, DeliveryCheckState};
pub use event::{
    DEFAULT_TIME_FORMAT, DEFAULT_VALUE_FORMAT, NotificationEvent, ValueFormat, current_state,
    last_state, subject_state,
};
pub use notification::{NotificationPackage, PlottingData, ScheduledNotification};
pub use state::{NotifierState, State};
pub use subscription::{MINUTES_PER_DAY, ScheduleData, ScheduleDay, SubscriptionData};
pub use trigger::TriggerData;
