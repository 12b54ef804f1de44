pub mod forums;
pub mod gdelt;
pub mod youtube;
