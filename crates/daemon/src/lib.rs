// SPDX-License-Identifier: MIT

//! forge-daemon: the worker runtime (§4.I). A thin claim/dispatch/report
//! loop over `forge-lifecycle`'s job handlers, plus a reaper for jobs whose
//! visibility timeout lapsed.

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod worker;

pub use worker::Worker;
