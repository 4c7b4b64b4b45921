// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::BTreeSet;

use thiserror::Error;

pub static RESERVED_SCOPES: [&str; 3] = ["offline_access", "openid", "profile"];

#[derive(Debug, Error)]
#[error("Scope {0} is reserved and is always requested, it cannot be supplied by the caller")]
pub struct ReservedScopeError(pub String);

/// Adds the reserved OIDC scopes to the caller's scopes and removes any
/// excluded ones. The result is sorted and free of duplicates.
pub fn decorate_scope(
    scopes: &[String],
    exclude: &[String],
) -> Result<Vec<String>, ReservedScopeError> {
    if let Some(reserved) = scopes
        .iter()
        .find(|scope| RESERVED_SCOPES.contains(&scope.as_str()))
    {
        return Err(ReservedScopeError(reserved.clone()));
    }

    let decorated = scopes
        .iter()
        .map(String::as_str)
        .chain(RESERVED_SCOPES.iter().copied())
        .filter(|scope| !exclude.iter().any(|excluded| excluded.as_str() == *scope))
        .map(str::to_owned)
        .collect::<BTreeSet<_>>();

    Ok(decorated.into_iter().collect())
}
