// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

pub mod cfg;
pub mod client;
pub mod msg;
pub mod msglist;
pub mod relay;
