// SPDX-License-Identifier: Apache-2.0

//! Provider driver implementations.

pub mod clickhouse;
pub mod mysql;
pub mod object_store;
pub mod parquet_http;
pub mod postgres;
pub mod sheet;
pub mod sqlite;
