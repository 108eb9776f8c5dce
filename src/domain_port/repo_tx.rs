/// Scoped transaction handle abstraction, kept distinct from the concrete
/// MySQL transaction type so the gateway trait itself stays storage-agnostic;
/// the MySQL infra layer downcasts back to its concrete type to issue
/// queries (see `infra_mysql::util::downcast`).
#[async_trait::async_trait]
pub trait TxManager: Send + Sync {
    async fn begin<'t>(&'t self) -> anyhow::Result<Box<dyn StorageTx<'t> + 't>>;
}

#[async_trait::async_trait]
pub trait StorageTx<'t>: Send {
    async fn commit(self: Box<Self>) -> anyhow::Result<()>;
    async fn rollback(self: Box<Self>) -> anyhow::Result<()>;
}
