//! Concrete socket layer for the splice engine

mod stream;

pub use stream::SpliceStream;
