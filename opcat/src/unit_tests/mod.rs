// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod declcfg_tests;
mod diff_tests;
mod property_tests;
mod query_tests;
mod render_tests;
