//! Fault signals: SIGILL, SIGFPE, SIGSEGV, SIGBUS.
//!
//! One `SA_SIGINFO` handler decodes the kernel's sub-code into a readable
//! reason and logs it at [`Level::Fatal`], which dumps the stack and aborts.
//!
//! The handler formats and allocates, so it is not async-signal-safe. A
//! process that just faulted is already past saving. Printing where and why
//! matters more, so the handler does its best and then dies.

use libc::{c_int, c_void, siginfo_t};
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{Level, LogError, Logger};

#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
use self::codes::*;

pub const FAULT_SIGNALS: [Signal; 4] = [
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGSEGV,
    Signal::SIGBUS,
];

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Routes fault signals to the process logger. Only the first call installs
/// anything. Call it early, before other threads start.
pub fn install_fault_handlers() -> Result<(), LogError> {
    if INSTALLED.swap(true, Ordering::SeqCst) {
        return Ok(());
    }

    // No SA_ONSTACK: std's per-thread alternate stack is too small for the
    // line buffer and the unwinder, and a fault there kills the process silently.
    let action = SigAction::new(
        SigHandler::SigAction(fault_handler),
        SaFlags::SA_SIGINFO,
        SigSet::empty(),
    );
    for signal in FAULT_SIGNALS {
        // SAFETY: fault_handler never returns into the faulting code.
        if let Err(source) = unsafe { sigaction(signal, &action) } {
            INSTALLED.store(false, Ordering::SeqCst);
            return Err(LogError::Sigaction { signal, source });
        }
    }
    Ok(())
}

extern "C" fn fault_handler(signo: c_int, info: *mut siginfo_t, _ucontext: *mut c_void) {
    // SAFETY: the kernel hands us either null or a valid siginfo_t.
    let fault = unsafe { FaultDescriptor::from_siginfo(signo, info) };
    report(crate::logger(), &fault);
}

/// Logs `fault` at fatal severity. Does not return.
pub(crate) fn report(logger: &Logger, fault: &FaultDescriptor) {
    logger.log(Level::Fatal, format_args!("{fault}"));
}

/// What the kernel told us about one fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultDescriptor {
    pub signo: c_int,
    pub code: c_int,
    /// Faulting address, where the platform exposes one.
    pub addr: Option<usize>,
}

impl FaultDescriptor {
    /// # Safety
    ///
    /// `info` must be null or point to a valid `siginfo_t`.
    pub unsafe fn from_siginfo(signo: c_int, info: *const siginfo_t) -> Self {
        match info.as_ref() {
            Some(info) => Self {
                signo,
                code: info.si_code,
                addr: fault_addr(info),
            },
            None => Self {
                signo,
                code: 0,
                addr: None,
            },
        }
    }

    pub fn reason(&self) -> &'static str {
        fault_reason(self.signo, self.code)
    }
}

impl fmt::Display for FaultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Terminating due to signal {} {}. {} (",
            self.signo,
            signal_description(self.signo),
            self.reason()
        )?;
        match self.addr {
            Some(addr) => write!(f, "{addr:#x})"),
            None => f.write_str("nil)"),
        }
    }
}

/// Reason for a `(signal, si_code)` pair, or `""` when the pair is unknown.
pub fn fault_reason(signo: c_int, code: c_int) -> &'static str {
    FAULT_REASONS
        .iter()
        .find(|(signal, c, _)| *signal as c_int == signo && *c == code)
        .map_or("", |&(_, _, reason)| reason)
}

pub fn signal_description(signo: c_int) -> &'static str {
    match Signal::try_from(signo) {
        Ok(Signal::SIGILL) => "Illegal instruction",
        Ok(Signal::SIGFPE) => "Floating point exception",
        Ok(Signal::SIGSEGV) => "Segmentation fault",
        Ok(Signal::SIGBUS) => "Bus error",
        Ok(signal) => signal.as_str(),
        Err(_) => "Unknown signal",
    }
}

#[cfg(target_os = "linux")]
unsafe fn fault_addr(info: &siginfo_t) -> Option<usize> {
    Some(info.si_addr() as usize)
}

#[cfg(target_vendor = "apple")]
unsafe fn fault_addr(info: &siginfo_t) -> Option<usize> {
    Some(info.si_addr as usize)
}

#[cfg(not(any(target_os = "linux", target_vendor = "apple")))]
unsafe fn fault_addr(_info: &siginfo_t) -> Option<usize> {
    None
}

/// `si_code` values; numbering differs between kernels.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) mod codes {
    use libc::c_int;

    pub const ILL_ILLOPC: c_int = 1;
    pub const ILL_ILLOPN: c_int = 2;
    pub const ILL_ILLADR: c_int = 3;
    pub const ILL_ILLTRP: c_int = 4;
    pub const ILL_PRVOPC: c_int = 5;
    pub const ILL_PRVREG: c_int = 6;
    pub const ILL_COPROC: c_int = 7;
    pub const ILL_BADSTK: c_int = 8;

    pub const FPE_INTDIV: c_int = 1;
    pub const FPE_INTOVF: c_int = 2;
    pub const FPE_FLTDIV: c_int = 3;
    pub const FPE_FLTOVF: c_int = 4;
    pub const FPE_FLTUND: c_int = 5;
    pub const FPE_FLTRES: c_int = 6;
    pub const FPE_FLTINV: c_int = 7;
    pub const FPE_FLTSUB: c_int = 8;

    pub const SEGV_MAPERR: c_int = 1;
    pub const SEGV_ACCERR: c_int = 2;

    pub const BUS_ADRALN: c_int = 1;
    pub const BUS_ADRERR: c_int = 2;
    pub const BUS_OBJERR: c_int = 3;
}

#[cfg(target_vendor = "apple")]
pub(crate) mod codes {
    use libc::c_int;

    pub const ILL_ILLOPC: c_int = 1;
    pub const ILL_ILLTRP: c_int = 2;
    pub const ILL_PRVOPC: c_int = 3;
    pub const ILL_ILLOPN: c_int = 4;
    pub const ILL_ILLADR: c_int = 5;
    pub const ILL_PRVREG: c_int = 6;
    pub const ILL_COPROC: c_int = 7;
    pub const ILL_BADSTK: c_int = 8;

    pub const FPE_FLTDIV: c_int = 1;
    pub const FPE_FLTOVF: c_int = 2;
    pub const FPE_FLTUND: c_int = 3;
    pub const FPE_FLTRES: c_int = 4;
    pub const FPE_FLTINV: c_int = 5;
    pub const FPE_FLTSUB: c_int = 6;
    pub const FPE_INTDIV: c_int = 7;
    pub const FPE_INTOVF: c_int = 8;

    pub const SEGV_MAPERR: c_int = 1;
    pub const SEGV_ACCERR: c_int = 2;

    pub const BUS_ADRALN: c_int = 1;
    pub const BUS_ADRERR: c_int = 2;
    pub const BUS_OBJERR: c_int = 3;
}

#[cfg(any(target_os = "linux", target_os = "android", target_vendor = "apple"))]
static FAULT_REASONS: &[(Signal, c_int, &str)] = &[
    (Signal::SIGILL, ILL_ILLOPC, "illegal opcode"),
    (Signal::SIGILL, ILL_ILLOPN, "illegal operand"),
    (Signal::SIGILL, ILL_ILLADR, "illegal addressing mode"),
    (Signal::SIGILL, ILL_ILLTRP, "illegal trap"),
    (Signal::SIGILL, ILL_PRVOPC, "privileged opcode"),
    (Signal::SIGILL, ILL_PRVREG, "privileged register"),
    (Signal::SIGILL, ILL_COPROC, "co-processor error"),
    (Signal::SIGILL, ILL_BADSTK, "internal stack error"),
    (Signal::SIGFPE, FPE_INTDIV, "integer divide by zero"),
    (Signal::SIGFPE, FPE_INTOVF, "integer overflow"),
    (Signal::SIGFPE, FPE_FLTDIV, "floating point divide by zero"),
    (Signal::SIGFPE, FPE_FLTOVF, "floating point overflow"),
    (Signal::SIGFPE, FPE_FLTUND, "floating point underflow"),
    (Signal::SIGFPE, FPE_FLTRES, "floating point inexact result"),
    (Signal::SIGFPE, FPE_FLTINV, "invalid floating point operation"),
    (Signal::SIGFPE, FPE_FLTSUB, "subscript out of range"),
    (Signal::SIGSEGV, SEGV_MAPERR, "address not mapped to object"),
    (Signal::SIGSEGV, SEGV_ACCERR, "invalid permissions for mapped object"),
    (Signal::SIGBUS, BUS_ADRALN, "invalid address alignment"),
    (Signal::SIGBUS, BUS_ADRERR, "non-existent physical address"),
    (Signal::SIGBUS, BUS_OBJERR, "object-specific hardware error"),
];

#[cfg(not(any(target_os = "linux", target_os = "android", target_vendor = "apple")))]
static FAULT_REASONS: &[(Signal, c_int, &str)] = &[];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::testing::{run_fatal, RecordingClients};

    const SIGSEGV: c_int = Signal::SIGSEGV as c_int;

    #[test]
    fn test_segv_maperr_reason() {
        assert_eq!(
            fault_reason(SIGSEGV, SEGV_MAPERR),
            "address not mapped to object"
        );
        assert_eq!(
            fault_reason(SIGSEGV, SEGV_ACCERR),
            "invalid permissions for mapped object"
        );
    }

    #[test]
    fn test_codes_are_scoped_to_their_signal() {
        let sigfpe = Signal::SIGFPE as c_int;
        let sigbus = Signal::SIGBUS as c_int;
        assert_eq!(fault_reason(sigfpe, FPE_INTDIV), "integer divide by zero");
        assert_eq!(fault_reason(sigbus, BUS_ADRALN), "invalid address alignment");
        assert_eq!(
            fault_reason(Signal::SIGILL as c_int, ILL_PRVOPC),
            "privileged opcode"
        );
        // A code valid for SIGSEGV means nothing for SIGTERM.
        assert_eq!(fault_reason(Signal::SIGTERM as c_int, SEGV_MAPERR), "");
    }

    #[test]
    fn test_unknown_code_is_empty() {
        assert_eq!(fault_reason(SIGSEGV, 99), "");
        assert_eq!(fault_reason(SIGSEGV, -6), "");
    }

    #[test]
    fn test_message_layout() {
        let fault = FaultDescriptor {
            signo: SIGSEGV,
            code: SEGV_MAPERR,
            addr: Some(0x10),
        };
        assert_eq!(
            fault.to_string(),
            "Terminating due to signal 11 Segmentation fault. address not mapped to object (0x10)"
        );
    }

    #[test]
    fn test_message_with_unknown_code_is_well_formed() {
        let fault = FaultDescriptor {
            signo: SIGSEGV,
            code: 99,
            addr: None,
        };
        assert_eq!(fault.reason(), "");
        assert_eq!(
            fault.to_string(),
            "Terminating due to signal 11 Segmentation fault.  (nil)"
        );
    }

    #[test]
    fn test_null_siginfo() {
        let fault = unsafe { FaultDescriptor::from_siginfo(SIGSEGV, std::ptr::null()) };
        assert_eq!(fault.code, 0);
        assert_eq!(fault.addr, None);
    }

    #[test]
    fn test_signal_descriptions() {
        assert_eq!(signal_description(Signal::SIGBUS as c_int), "Bus error");
        assert_eq!(signal_description(Signal::SIGTERM as c_int), "SIGTERM");
        assert_eq!(signal_description(-3), "Unknown signal");
    }

    #[test]
    fn test_report_goes_through_fatal_path() {
        let fault = FaultDescriptor {
            signo: SIGSEGV,
            code: SEGV_MAPERR,
            addr: Some(0xdead),
        };
        let run = run_fatal(
            Level::Error,
            RecordingClients::default(),
            Some(vec!["handler"]),
            move |logger| report(logger, &fault),
        );

        assert!(run.terminated);
        let lines = run.stderr.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("signal 11 Segmentation fault. address not mapped to object (0xdead)"));
        assert!(lines[2].ends_with("] handler\n"));
    }

    #[test]
    fn test_install_is_idempotent() {
        install_fault_handlers().unwrap();
        install_fault_handlers().unwrap();
    }

    #[test]
    fn test_handlers_run_on_the_faulting_stack() {
        install_fault_handlers().unwrap();
        for signal in FAULT_SIGNALS {
            let mut current: libc::sigaction = unsafe { std::mem::zeroed() };
            // SAFETY: a null new action only queries the installed one.
            let rc = unsafe { libc::sigaction(signal as c_int, std::ptr::null(), &mut current) };
            assert_eq!(rc, 0);
            assert_eq!(current.sa_sigaction, fault_handler as usize, "{signal}");
            assert_ne!(current.sa_flags & libc::SA_SIGINFO, 0, "{signal}");
            assert_eq!(current.sa_flags & libc::SA_ONSTACK, 0, "{signal}");
        }
    }
}
