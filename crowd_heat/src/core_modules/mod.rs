pub mod compositor;
pub mod density;
pub mod detection;
pub mod gradient;
