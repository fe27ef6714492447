pub mod candle;
pub mod forecast;
pub mod model;

pub use candle::*;
pub use forecast::*;
pub use model::*;
