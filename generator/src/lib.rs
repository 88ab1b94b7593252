pub mod builder;
pub mod model;
pub mod resolve;
pub mod tags;
pub mod target;
