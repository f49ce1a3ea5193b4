// Copyright (c) The opcat Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod cache_tests;
