pub mod api;
pub mod live;
