// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use uuid::Uuid;

use crate::error::BoxError;

/// Source of the opaque, unique identifier assigned to each entrypoint instance
pub trait IdSource: Send + Sync {
    fn next_id(&self) -> Result<String, BoxError>;
}

/// Random (v4) UUIDs in their hyphenated form
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidSource;

impl IdSource for UuidSource {
    fn next_id(&self) -> Result<String, BoxError> {
        Ok(Uuid::new_v4().hyphenated().to_string())
    }
}
