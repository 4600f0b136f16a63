mod contact;
mod fallback;
mod health;
mod items;
mod users;

pub use contact::submit_contact;
pub use fallback::{method_not_allowed, not_found};
pub use health::health_check;
pub use items::get_item;
pub use users::{create_user, delete_user, get_user, list_users, update_user};
