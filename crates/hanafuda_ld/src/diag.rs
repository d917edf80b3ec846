// crates/hanafuda_ld/src/diag.rs
//
// Accumulating diagnostics sink. Errors never unwind the link; the
// driver checks the count at phase boundaries and the writer refuses
// to produce a file once any error has been queued.

use std::cell::Cell;
use std::fmt::Display;

#[derive(Default)]
pub struct Diagnostics {
    errors: Cell<usize>,
    warnings: Cell<usize>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Diagnostics::default()
    }

    pub fn error(&self, msg: impl Display) {
        self.errors.set(self.errors.get() + 1);
        log::error!("{}", msg);
    }

    pub fn warn(&self, msg: impl Display) {
        self.warnings.set(self.warnings.get() + 1);
        log::warn!("{}", msg);
    }

    pub fn has_errors(&self) -> bool {
        self.errors.get() != 0
    }

    pub fn error_count(&self) -> usize {
        self.errors.get()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings.get()
    }
}
