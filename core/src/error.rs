// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use std::io;

use thiserror::Error;

/// Errors raised while constructing the dispatch fabric: bad configuration,
/// failed binds, unloadable plugins.  Always fatal at boot.
#[derive(Debug, Error)]
pub enum CreationError {
    #[error("invalid resource: {0}")]
    InvalidResource(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("plugin error: {0}")]
    Plugin(String),
}

impl CreationError {
    pub fn invalid<S: Into<String>>(s: S) -> Self { CreationError::InvalidResource(s.into()) }

    pub fn config<S: Into<String>>(s: S) -> Self { CreationError::Configuration(s.into()) }

    pub fn plugin<S: Into<String>>(s: S) -> Self { CreationError::Plugin(s.into()) }
}

/// Error raised by a request-processing method with a carried status code.
/// Codes `>= 400` are terminal failures; `100..400` are non-error status
/// overrides that let dispatch continue serializing normally.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct CodedError {
    pub code: u16,
    pub message: String,
}

impl CodedError {
    pub fn new<S: Into<String>>(code: u16, message: S) -> Self {
        CodedError { code, message: message.into() }
    }

    pub fn is_terminal(&self) -> bool { self.code / 100 >= 4 }
}
