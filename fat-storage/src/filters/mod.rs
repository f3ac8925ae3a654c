//! Concrete byte-stream filters and the standard filter table.

mod xor;

pub use xor::{RffCrypt, XorFilter};

use seg_stream::FilterRegistry;
use std::rc::Rc;

/// The filter table the bundled formats expect.
///
/// `xor-blood` is the Blood RFF payload cipher.  The LZW identifiers the
/// EPF and Monster Bash formats record (`lzw-epfs`, `lzw-bash`) are not
/// provided here; opening such an entry with the filter enabled reports a
/// missing filter and leaves the archive untouched.
pub fn standard_filters() -> FilterRegistry {
    let mut reg = FilterRegistry::new();
    reg.register("xor", Rc::new(XorFilter::new(0xff)));
    reg.register("xor-blood", Rc::new(RffCrypt::new(0)));
    reg
}
