/// Classification for retry policy.
///
/// Every failure is recorded in the health tracker regardless of class; the
/// class only decides whether the dispatcher spends another attempt on the
/// same provider before moving down the candidate list.
///
/// | Class | Retry same provider? | Try next provider? |
/// |-------|----------------------|--------------------|
/// | `SameProvider` | Yes, while attempts remain | Yes, once attempts run out |
/// | `NextProvider` | No | Yes |
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryClass {
    /// Transient failure (timeout, connection error).
    ///
    /// Worth another attempt on the same provider after a short backoff,
    /// bounded by the configured attempt budget.
    SameProvider,

    /// The provider answered and refused (bad status, malformed payload).
    /// Go straight to the next candidate.
    NextProvider,
}
