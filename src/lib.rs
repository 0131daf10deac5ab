pub mod category;
pub mod compare;
pub mod extract;
pub mod fetch;
pub mod persist;
pub mod store;
