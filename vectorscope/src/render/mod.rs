pub mod capture;
pub mod context;
pub mod display;
pub mod frame;
