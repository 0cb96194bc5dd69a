//! Compilation flags (§6 "Debug flags").
//!
//! Grounded on `cranelift-codegen`'s `settings::Flags` builder pattern,
//! trimmed down to exactly the flag set §6 names — this crate has no ISA
//! variance or optimization-level knobs to thread through a generated
//! settings template, so a plain struct with a builder suffices.

/// One independently-toggled debug flag from §6's table.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DebugFlag {
    /// Dump IR after CSSA construction.
    PrintCssa,
    /// Verbose liveness/coloring trace, emitted through `log` at `trace!`
    /// level. Independent of the `trace-log` Cargo feature, which gates
    /// whether the trace call sites are compiled in at all.
    DebugAllocator,
    /// Dump the allocation map once storage allocation finishes.
    PrintLivenessIntervals,
    /// Dump IR immediately before emission.
    PrintFinalPir,
    /// Dump the emitted bytecode after the emitter runs.
    PrintFinalRir,
    /// Run the full pipeline but do not install the result into the
    /// dispatch table.
    DryRun,
}

/// Compilation-wide switches. One `Flags` value is shared by every pass in
/// a `Context::compile` call.
#[derive(Clone, Debug)]
pub struct Flags {
    print_cssa: bool,
    debug_allocator: bool,
    print_liveness_intervals: bool,
    print_final_pir: bool,
    print_final_rir: bool,
    dry_run: bool,
    enable_verifier: bool,
}

impl Flags {
    /// The default flag set: every debug dump is off, and the verifier
    /// runs after every pass — the same default stance as
    /// `cranelift-codegen`'s `enable_verifier`, since the cost of a skipped
    /// verifier run on a miscompiled allocator is a silent wrong answer.
    pub fn new() -> Self {
        Flags {
            print_cssa: false,
            debug_allocator: false,
            print_liveness_intervals: false,
            print_final_pir: false,
            print_final_rir: false,
            dry_run: false,
            enable_verifier: true,
        }
    }

    pub fn set(&mut self, flag: DebugFlag, value: bool) -> &mut Self {
        match flag {
            DebugFlag::PrintCssa => self.print_cssa = value,
            DebugFlag::DebugAllocator => self.debug_allocator = value,
            DebugFlag::PrintLivenessIntervals => self.print_liveness_intervals = value,
            DebugFlag::PrintFinalPir => self.print_final_pir = value,
            DebugFlag::PrintFinalRir => self.print_final_rir = value,
            DebugFlag::DryRun => self.dry_run = value,
        }
        self
    }

    pub fn is_set(&self, flag: DebugFlag) -> bool {
        match flag {
            DebugFlag::PrintCssa => self.print_cssa,
            DebugFlag::DebugAllocator => self.debug_allocator,
            DebugFlag::PrintLivenessIntervals => self.print_liveness_intervals,
            DebugFlag::PrintFinalPir => self.print_final_pir,
            DebugFlag::PrintFinalRir => self.print_final_rir,
            DebugFlag::DryRun => self.dry_run,
        }
    }

    pub fn enable_verifier(&self) -> bool {
        self.enable_verifier
    }

    pub fn set_enable_verifier(&mut self, value: bool) -> &mut Self {
        self.enable_verifier = value;
        self
    }
}

impl Default for Flags {
    fn default() -> Self {
        Self::new()
    }
}
