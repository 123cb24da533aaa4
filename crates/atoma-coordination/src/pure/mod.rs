//! Pure functions extracted from the coordination engine.
//!
//! This module implements the "Functional Core, Imperative Shell" pattern:
//! every decision the engine makes (may this request be granted, when does a
//! lease expire, how long to back off, does this arrival trip the barrier) is
//! a deterministic function of its inputs. The async shell reads records,
//! calls into here, and writes the result back with a version check.
//!
//! # Module Organization
//!
//! - [`backoff`]: Exponential backoff with bounded jitter
//! - [`lease`]: Deadlines, renewal timing, expiry checks
//! - [`rwlock`]: Read/write grantability and writer-preference fairness
//! - [`barrier`]: Arrival indices and trip detection
//!
//! # Tiger Style
//!
//! - All calculations use saturating arithmetic to prevent overflow/underflow
//! - Deterministic behavior (time passed as explicit parameter, no I/O)
//! - Explicit types (u64, u32, not usize)
//! - No panics - all functions are total

pub mod backoff;
pub mod barrier;
pub mod lease;
pub mod rwlock;
