//! Typed mutation operations
//!
//! Thin typed wrappers over [`ControlPlane`]. Each returns the state the
//! control plane observed after the call.
//!
//! [`create_or_patch`] and [`patch`] are read-modify-write: they fetch the
//! current object, run a caller-supplied transform over it and send only
//! the difference. The transform must be pure. Running it again against an
//! object that already reflects it produces an empty diff, so retries are
//! safe.

use std::fmt;

use tracing::{debug, info};

use crate::client::ControlPlane;
use crate::resource::{ResourceHandle, StackResource};
use crate::Error;

/// What a create-or-patch call ended up doing
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    /// The object was absent and has been created
    Created,
    /// The object existed and a non-empty patch was sent
    Patched,
    /// The object already matched, nothing was sent
    Unchanged,
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verb::Created => f.write_str("created"),
            Verb::Patched => f.write_str("patched"),
            Verb::Unchanged => f.write_str("unchanged"),
        }
    }
}

/// Create `obj` in `namespace`
///
/// An existing object with the same name yields [`Error::Conflict`].
pub async fn create<K, C>(cp: &C, namespace: &str, obj: &K) -> Result<K, Error>
where
    K: StackResource,
    C: ControlPlane + ?Sized,
{
    let observed = cp.create(namespace, &obj.clone().into_resource()).await?;
    K::from_resource(observed)
}

/// Fetch the current state of `handle`
pub async fn get<K, C>(cp: &C, handle: &ResourceHandle) -> Result<K, Error>
where
    K: StackResource,
    C: ControlPlane + ?Sized,
{
    let observed = cp.get(handle).await?;
    K::from_resource(observed)
}

/// Delete `handle`
pub async fn delete<C>(cp: &C, handle: &ResourceHandle) -> Result<(), Error>
where
    C: ControlPlane + ?Sized,
{
    cp.delete(handle).await
}

/// Create `handle` from `mutate(K::default())` if absent, otherwise patch it
/// with the difference between its current state and `mutate(current)`.
pub async fn create_or_patch<K, C, F>(
    cp: &C,
    handle: &ResourceHandle,
    mutate: F,
) -> Result<(K, Verb), Error>
where
    K: StackResource,
    C: ControlPlane + ?Sized,
    F: Fn(K) -> K,
{
    match get::<K, C>(cp, handle).await {
        Ok(current) => patch_existing(cp, handle, current, &mutate).await,
        Err(e) if e.is_not_found() => {
            let mut base = K::default();
            base.meta_mut().name = Some(handle.name.clone());
            base.meta_mut().namespace = Some(handle.namespace.clone());
            let desired = mutate(base);
            info!(resource = %handle, "Creating");
            let created = create(cp, &handle.namespace, &desired).await?;
            Ok((created, Verb::Created))
        }
        Err(e) => Err(e),
    }
}

/// Patch an existing `handle` with the difference `mutate` introduces
///
/// Unlike [`create_or_patch`], an absent object is an error.
pub async fn patch<K, C, F>(cp: &C, handle: &ResourceHandle, mutate: F) -> Result<(K, Verb), Error>
where
    K: StackResource,
    C: ControlPlane + ?Sized,
    F: Fn(K) -> K,
{
    let current = get::<K, C>(cp, handle).await?;
    patch_existing(cp, handle, current, &mutate).await
}

async fn patch_existing<K, C, F>(
    cp: &C,
    handle: &ResourceHandle,
    current: K,
    mutate: &F,
) -> Result<(K, Verb), Error>
where
    K: StackResource,
    C: ControlPlane + ?Sized,
    F: Fn(K) -> K,
{
    let patch = diff(&current, &mutate(current.clone()))?;
    if patch.0.is_empty() {
        debug!(resource = %handle, "Already up to date");
        return Ok((current, Verb::Unchanged));
    }

    info!(resource = %handle, ops = patch.0.len(), "Patching");
    let observed = cp.patch(handle, &patch).await?;
    Ok((K::from_resource(observed)?, Verb::Patched))
}

/// JSON patch that turns `current` into `desired`
pub fn diff<K: StackResource>(current: &K, desired: &K) -> Result<json_patch::Patch, Error> {
    let current = serde_json::to_value(current).map_err(|e| Error::serialization(e.to_string()))?;
    let desired = serde_json::to_value(desired).map_err(|e| Error::serialization(e.to_string()))?;
    Ok(json_patch::diff(&current, &desired))
}
