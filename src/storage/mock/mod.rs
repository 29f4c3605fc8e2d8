//! Mock storage implementations for testing.

mod entity_store;
mod table_admin;

pub use entity_store::MockEntityStore;
pub use table_admin::MockTableAdmin;
