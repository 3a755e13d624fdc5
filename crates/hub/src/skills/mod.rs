pub mod registry;
pub mod router;
