//! Statistical tests used to compare baseline and tested fold results.

mod wx;

pub use wx::{wx_test, WxTestResult};
