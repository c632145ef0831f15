use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameBusError {
    #[error("detection count {0} does not fit the 16-bit wire count")]
    TooManyDetections(usize),

    #[error("encoded frame of {0} bytes does not fit the 16-bit wire length")]
    FrameTooLarge(usize),

    #[error("frame bus closed")]
    Closed,
}
