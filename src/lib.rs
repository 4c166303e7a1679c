// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1

pub mod api;
pub mod config;
pub mod context;
pub mod core;
pub mod embedding;
pub mod index;
pub mod ingest;
pub mod matching;
pub mod metadata;
pub mod storage;
