//! Handlers for the base operations and module RPCs.
//!
//! Every handler that writes a datastore checks the lock registry first and
//! answers `lock-denied` when another session holds the target.

use async_trait::async_trait;
use serde_json::Value;

use crate::datastore::Datastore;
use crate::operations::{OperationContext, OperationHandler, Outcome, RpcError};
use crate::store::{StoreError, Tree};

fn datastore_param(params: &Value, key: &'static str) -> Result<Datastore, RpcError> {
    let name = params
        .get(key)
        .and_then(Value::as_str)
        .ok_or(RpcError::MissingParameter(key))?;
    name.parse().map_err(|e: crate::datastore::UnknownDatastore| RpcError::InvalidValue(e.to_string()))
}

fn filter_param(params: &Value) -> &str {
    params.get("filter").and_then(Value::as_str).unwrap_or("")
}

fn ensure_writable(ctx: &OperationContext<'_>, ds: Datastore) -> Result<(), RpcError> {
    ctx.locks
        .permits_write(ds, ctx.session)
        .map_err(|holder| RpcError::LockDenied { holder })
}

fn tree_value(tree: Tree) -> Value {
    Value::Object(tree.into_iter().collect())
}

async fn read_tree(ctx: &mut OperationContext<'_>, ds: Datastore, filter: &str) -> Result<Outcome, RpcError> {
    let previous = ctx.store.datastore();
    ctx.store.switch_datastore(ds);
    let result = ctx.store.get_items(filter).await;
    ctx.store.switch_datastore(previous);
    Ok(Outcome::Data(tree_value(result?)))
}

/// `get`: running content under an optional filter prefix.
pub struct Get;

#[async_trait]
impl OperationHandler for Get {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        read_tree(ctx, Datastore::Running, filter_param(params)).await
    }
}

/// `get-config`: content of `source` under an optional filter prefix.
pub struct GetConfig;

#[async_trait]
impl OperationHandler for GetConfig {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let source = datastore_param(params, "source")?;
        read_tree(ctx, source, filter_param(params)).await
    }
}

/// `edit-config`: set items of `config` on `target`; a null value deletes.
pub struct EditConfig;

#[async_trait]
impl OperationHandler for EditConfig {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let target = datastore_param(params, "target")?;
        let config = params
            .get("config")
            .ok_or(RpcError::MissingParameter("config"))?
            .as_object()
            .ok_or_else(|| RpcError::InvalidValue("config must be an object".into()))?;
        ensure_writable(ctx, target)?;

        let previous = ctx.store.datastore();
        ctx.store.switch_datastore(target);
        let mut result = Ok(());
        for (path, value) in config {
            result = match value {
                Value::Null => ctx.store.delete_item(path).await,
                value => ctx.store.set_item(path, value.clone()).await,
            };
            if result.is_err() {
                break;
            }
        }
        ctx.store.switch_datastore(previous);
        result?;
        Ok(Outcome::Ok)
    }
}

/// `copy-config`: replace `target` with `source`.
pub struct CopyConfig;

#[async_trait]
impl OperationHandler for CopyConfig {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let source = datastore_param(params, "source")?;
        let target = datastore_param(params, "target")?;
        if source == target {
            return Err(RpcError::InvalidValue("source and target are the same datastore".into()));
        }
        ensure_writable(ctx, target)?;
        ctx.store.copy_config(source, target).await?;
        Ok(Outcome::Ok)
    }
}

/// `delete-config`: empty `target` (never running).
pub struct DeleteConfig;

#[async_trait]
impl OperationHandler for DeleteConfig {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let target = datastore_param(params, "target")?;
        ensure_writable(ctx, target)?;
        ctx.store.delete_config(target).await.map_err(|e| match e {
            StoreError::NotPermitted(ds) => RpcError::NotSupported(format!("delete-config on {}", ds)),
            other => other.into(),
        })?;
        Ok(Outcome::Ok)
    }
}

/// `lock`: take the exclusive lock on `target`.
pub struct Lock;

#[async_trait]
impl OperationHandler for Lock {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let target = datastore_param(params, "target")?;
        if ctx.locks.acquire(target, ctx.session) {
            Ok(Outcome::Ok)
        } else {
            match ctx.locks.holder(target) {
                Some(holder) => Err(RpcError::LockDenied { holder }),
                // Released between the attempt and the query.
                None => Err(RpcError::OperationFailed(format!("{} lock contended, retry", target))),
            }
        }
    }
}

/// `unlock`: release the lock on `target` held by this session.
pub struct Unlock;

#[async_trait]
impl OperationHandler for Unlock {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let target = datastore_param(params, "target")?;
        if ctx.locks.release(target, ctx.session) {
            return Ok(Outcome::Ok);
        }
        match ctx.locks.holder(target) {
            Some(holder) => Err(RpcError::OperationFailed(format!(
                "{} lock is held by session {}",
                target, holder
            ))),
            None => Err(RpcError::OperationFailed(format!("{} is not locked", target))),
        }
    }
}

/// `commit`: apply candidate to running.
pub struct Commit;

#[async_trait]
impl OperationHandler for Commit {
    async fn handle(&self, ctx: &mut OperationContext<'_>, _params: &Value) -> Result<Outcome, RpcError> {
        ensure_writable(ctx, Datastore::Running)?;
        ensure_writable(ctx, Datastore::Candidate)?;
        ctx.store.commit().await?;
        Ok(Outcome::Ok)
    }
}

/// `discard-changes`: reset candidate to running.
pub struct DiscardChanges;

#[async_trait]
impl OperationHandler for DiscardChanges {
    async fn handle(&self, ctx: &mut OperationContext<'_>, _params: &Value) -> Result<Outcome, RpcError> {
        ensure_writable(ctx, Datastore::Candidate)?;
        ctx.store.discard_changes().await?;
        Ok(Outcome::Ok)
    }
}

/// `validate`: check the content of `source`.
pub struct Validate;

#[async_trait]
impl OperationHandler for Validate {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let source = datastore_param(params, "source")?;
        ctx.store.validate(source).await?;
        Ok(Outcome::Ok)
    }
}

/// `close-session`: reply ok and end the session; teardown releases its locks.
pub struct CloseSession;

#[async_trait]
impl OperationHandler for CloseSession {
    async fn handle(&self, _ctx: &mut OperationContext<'_>, _params: &Value) -> Result<Outcome, RpcError> {
        Ok(Outcome::CloseSession)
    }
}

/// An RPC defined by a store module, forwarded to the store.
pub struct ModuleRpc {
    name: String,
}

impl ModuleRpc {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl OperationHandler for ModuleRpc {
    async fn handle(&self, ctx: &mut OperationContext<'_>, params: &Value) -> Result<Outcome, RpcError> {
        let output = ctx.store.rpc_send(&self.name, params.clone()).await?;
        Ok(Outcome::Data(output))
    }
}
