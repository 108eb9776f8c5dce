use crate::domain_port::{StorageTx, TxManager};
use sqlx::{MySql, MySqlConnection, Pool, Transaction};

pub struct MySqlTxManager {
    pool: Pool<MySql>,
}

impl MySqlTxManager {
    pub fn new(pool: Pool<MySql>) -> Self {
        MySqlTxManager { pool }
    }
}

#[async_trait::async_trait]
impl TxManager for MySqlTxManager {
    async fn begin<'t>(&'t self) -> anyhow::Result<Box<dyn StorageTx<'t> + 't>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(MySqlTx { inner: tx }))
    }
}

pub struct MySqlTx<'t> {
    inner: Transaction<'t, MySql>,
}

impl<'t> MySqlTx<'t> {
    pub fn conn(&mut self) -> &mut MySqlConnection {
        &mut self.inner
    }
}

#[async_trait::async_trait]
impl<'t> StorageTx<'t> for MySqlTx<'t> {
    async fn commit(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> anyhow::Result<()> {
        self.inner.rollback().await?;
        Ok(())
    }
}
