// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::io;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// the input cannot start serving: broker unreachable, partition
    /// discovery failed or a partition could not be subscribed
    #[error("startup error: {0}")]
    Startup(String),

    #[error("broker error: {0}")]
    Broker(#[from] rskafka::client::error::Error),

    /// payload is not a valid envelope document
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("io error: {0}")]
    IoError(#[from] io::Error),

    #[error("config file error: {0}")]
    ConfigFileError(#[from] config::ConfigError),
}

impl From<AppError> for io::Error {
    fn from(value: AppError) -> Self {
        match value {
            AppError::IoError(err) => err,
            AppError::Decode(err) => io::Error::new(io::ErrorKind::InvalidData, err),
            other => io::Error::new(io::ErrorKind::Other, other),
        }
    }
}
