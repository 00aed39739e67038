#![forbid(unsafe_code)]
#![cfg_attr(
    not(feature = "libsql-backend"),
    doc = "Enable feature `libsql-backend` to use this adapter."
)]

/// Environment variable read by `LibsqlTransactionManager::from_env`.
pub const DATABASE_URL_ENV: &str = "PROJECTIT_DATABASE_URL";

#[cfg(feature = "libsql-backend")]
mod backend {
    use std::future::Future;
    use std::sync::Arc;
    use std::time::Instant;

    use async_trait::async_trait;
    use libsql::{Builder, Connection, Database, Value};
    use projectit_core::transactions::{Isolation, TransactionDefinition, TransactionManager};
    use projectit_core::{
        MappingError, ParamValue, RepoError, RepoResult, Row, Select, SequenceDefinition, Session,
    };

    #[cfg(feature = "tracing")]
    use tracing::{info, warn};

    #[inline]
    #[allow(unused_variables)]
    fn obs_record(op: &str, table: &str, start: Instant, rows: usize, success: bool) {
        let elapsed = start.elapsed().as_millis() as u64;
        #[cfg(feature = "tracing")]
        {
            info!(
                sql_kind = "sql",
                table = table,
                op = op,
                rows = rows,
                elapsed_ms = elapsed,
                success = success,
                "repo op"
            );
        }
        #[cfg(feature = "metrics")]
        {
            metrics::counter!("repo_ops_total", 1, "op" => op.to_string(), "table" => table.to_string(), "success" => success.to_string());
            metrics::histogram!("repo_op_duration_ms", elapsed as f64, "op" => op.to_string(), "table" => table.to_string());
            if !success {
                metrics::counter!("repo_op_errors_total", 1, "op" => op.to_string(), "table" => table.to_string());
            }
        }
    }

    /// Record the outcome of `res` and pass it through.
    fn observed<T>(
        op: &str,
        table: &str,
        start: Instant,
        rows: impl Fn(&T) -> usize,
        res: RepoResult<T>,
    ) -> RepoResult<T> {
        match &res {
            Ok(v) => obs_record(op, table, start, rows(v), true),
            Err(_) => obs_record(op, table, start, 0, false),
        }
        res
    }

    fn begin_sql(isolation: Isolation) -> &'static str {
        match isolation {
            Isolation::Default | Isolation::ReadCommitted => "BEGIN DEFERRED",
            Isolation::RepeatableRead => "BEGIN IMMEDIATE",
            Isolation::Serializable => "BEGIN EXCLUSIVE",
        }
    }

    /// Run a pragma to completion. Some pragmas answer with a row, which `execute` rejects.
    async fn pragma(conn: &Connection, sql: &str) -> libsql::Result<()> {
        let mut rows = conn.query(sql, ()).await?;
        while rows.next().await?.is_some() {}
        Ok(())
    }

    // Helper function to convert ParamValue to libsql::Value.
    fn to_libsql_value(p: ParamValue) -> Value {
        match p {
            ParamValue::String(s) => s.into(),
            ParamValue::I32(i) => (i as i64).into(), // libsql uses i64 for integers
            ParamValue::I64(i) => i.into(),
            ParamValue::F64(f) => f.into(),
            ParamValue::Bool(b) => (b as i64).into(), // SQLite bools are 0/1
            ParamValue::Null => Value::Null,
        }
    }

    fn from_libsql_value(column: &str, v: Value) -> RepoResult<ParamValue> {
        Ok(match v {
            Value::Null => ParamValue::Null,
            Value::Integer(i) => ParamValue::I64(i),
            Value::Real(f) => ParamValue::F64(f),
            Value::Text(s) => ParamValue::String(s),
            Value::Blob(_) => {
                return Err(RepoError::mapping(MappingError::TypeMismatch {
                    column: column.to_string(),
                    expected: "scalar",
                }))
            }
        })
    }

    fn values(params: Vec<ParamValue>) -> Vec<Value> {
        params.into_iter().map(to_libsql_value).collect()
    }

    /// A [`Session`] over one libsql connection. Inside
    /// [`LibsqlTransactionManager::execute`] the connection holds an open transaction.
    #[derive(Clone)]
    pub struct LibsqlSession {
        conn: Connection,
    }

    impl std::fmt::Debug for LibsqlSession {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibsqlSession").finish_non_exhaustive()
        }
    }

    impl LibsqlSession {
        pub fn new(conn: Connection) -> Self {
            Self { conn }
        }

        /// The underlying connection, for statements the session does not cover.
        pub fn connection(&self) -> &Connection {
            &self.conn
        }

        async fn query_one_i64(&self, sql: &str, params: Vec<Value>) -> RepoResult<i64> {
            let mut rows = self
                .conn
                .query(sql, params)
                .await
                .map_err(RepoError::backend)?;
            let row = rows
                .next()
                .await
                .map_err(RepoError::backend)?
                .ok_or_else(|| {
                    RepoError::backend(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        format!("no row returned from `{sql}`"),
                    ))
                })?;
            match row.get_value(0).map_err(RepoError::backend)? {
                Value::Integer(i) => Ok(i),
                _ => Err(RepoError::mapping(MappingError::TypeMismatch {
                    column: "0".to_string(),
                    expected: "integer",
                })),
            }
        }
    }

    #[async_trait]
    impl Session for LibsqlSession {
        async fn next_value(&self, sequence: &SequenceDefinition) -> RepoResult<i64> {
            let start = Instant::now();
            let res = async {
                self.conn
                    .execute(&projectit_sql_builder::create_sequences_table(), ())
                    .await
                    .map_err(RepoError::backend)?;
                self.conn
                    .execute(
                        &projectit_sql_builder::sequence_init(),
                        vec![
                            Value::from(sequence.name.to_string()),
                            Value::from(sequence.initial_value),
                        ],
                    )
                    .await
                    .map_err(RepoError::backend)?;
                let high = self
                    .query_one_i64(
                        &projectit_sql_builder::sequence_advance(),
                        vec![
                            Value::from(sequence.allocation_size),
                            Value::from(sequence.name.to_string()),
                        ],
                    )
                    .await?;
                Ok(high - sequence.allocation_size)
            }
            .await;
            observed("next_value", sequence.name, start, |_| 1, res)
        }

        async fn insert(
            &self,
            table: &str,
            columns: &[&str],
            values_in: Vec<ParamValue>,
        ) -> RepoResult<()> {
            let start = Instant::now();
            let sql = projectit_sql_builder::insert(table, columns);
            let res = self
                .conn
                .execute(&sql, values(values_in))
                .await
                .map(|_| ())
                .map_err(RepoError::backend);
            observed("insert", table, start, |_| 1, res)
        }

        async fn update(
            &self,
            table: &str,
            id_column: &str,
            id: i64,
            columns: &[&str],
            values_in: Vec<ParamValue>,
        ) -> RepoResult<u64> {
            let start = Instant::now();
            let sql = projectit_sql_builder::update_by_id(table, id_column, columns);
            let mut params = values(values_in);
            params.push(Value::Integer(id));
            let res = self
                .conn
                .execute(&sql, params)
                .await
                .map_err(RepoError::backend);
            observed("update", table, start, |n| *n as usize, res)
        }

        async fn delete_by_id(&self, table: &str, id_column: &str, id: i64) -> RepoResult<u64> {
            let start = Instant::now();
            let sql = projectit_sql_builder::delete_by_id(table, id_column);
            let res = self
                .conn
                .execute(&sql, vec![Value::Integer(id)])
                .await
                .map_err(RepoError::backend);
            observed("delete_by_id", table, start, |n| *n as usize, res)
        }

        async fn delete_all(&self, table: &str) -> RepoResult<u64> {
            let start = Instant::now();
            let res = self
                .conn
                .execute(&projectit_sql_builder::delete_all(table), ())
                .await
                .map_err(RepoError::backend);
            observed("delete_all", table, start, |n| *n as usize, res)
        }

        async fn select(&self, select: &Select<'_>) -> RepoResult<Vec<Row>> {
            let start = Instant::now();
            let (sql, params) = projectit_sql_builder::select(select);
            let res = async {
                let mut rows = self
                    .conn
                    .query(&sql, values(params))
                    .await
                    .map_err(RepoError::backend)?;
                let mut out = Vec::new();
                while let Some(row) = rows.next().await.map_err(RepoError::backend)? {
                    let mut mapped = Row::with_capacity(select.columns.len());
                    for (i, col) in select.columns.iter().enumerate() {
                        let v = row.get_value(i as i32).map_err(RepoError::backend)?;
                        mapped.push(*col, from_libsql_value(col, v)?);
                    }
                    out.push(mapped);
                }
                Ok(out)
            }
            .await;
            observed("select", select.table, start, Vec::len, res)
        }

        async fn count(&self, table: &str) -> RepoResult<u64> {
            let start = Instant::now();
            let res = self
                .query_one_i64(&projectit_sql_builder::count_all(table), Vec::new())
                .await
                .map(|n| n as u64);
            observed("count", table, start, |_| 1, res)
        }
    }

    /// A concrete TransactionManager for libsql/SQLite.
    ///
    /// File databases open a fresh connection per session and per transaction. An in-memory
    /// database exists only within one connection, so `:memory:` managers share a single
    /// connection and transactions on it must not overlap.
    #[derive(Clone)]
    pub struct LibsqlTransactionManager {
        db: Arc<Database>,
        shared: Option<Connection>,
    }

    impl std::fmt::Debug for LibsqlTransactionManager {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("LibsqlTransactionManager")
                .field("in_memory", &self.shared.is_some())
                .finish()
        }
    }

    impl LibsqlTransactionManager {
        pub fn new(db: Arc<Database>) -> Self {
            Self { db, shared: None }
        }

        /// Open a local database. Accepts a path, `file:<path>` or `:memory:`.
        pub async fn from_url(url: &str) -> RepoResult<Self> {
            let path = url.strip_prefix("file:").unwrap_or(url);
            let path = path.split('?').next().unwrap_or(path);
            let db = Builder::new_local(path)
                .build()
                .await
                .map_err(RepoError::backend)?;
            let shared = if path == ":memory:" {
                Some(db.connect().map_err(RepoError::backend)?)
            } else {
                None
            };
            #[cfg(feature = "tracing")]
            info!(path, in_memory = shared.is_some(), "opened libsql database");
            Ok(Self {
                db: Arc::new(db),
                shared,
            })
        }

        /// Open the database named by `PROJECTIT_DATABASE_URL`.
        pub async fn from_env() -> RepoResult<Self> {
            let url = std::env::var(crate::DATABASE_URL_ENV).map_err(RepoError::backend)?;
            Self::from_url(&url).await
        }

        fn connection(&self) -> RepoResult<Connection> {
            match &self.shared {
                Some(conn) => Ok(conn.clone()),
                None => self.db.connect().map_err(RepoError::backend),
            }
        }

        /// Run a multi-statement SQL script (migrations) outside any transaction.
        pub async fn run_script(&self, sql: &str) -> RepoResult<()> {
            let start = Instant::now();
            let conn = self.connection()?;
            let res = conn
                .execute_batch(sql)
                .await
                .map(|_| ())
                .map_err(RepoError::backend);
            observed("run_script", "-", start, |_| 0, res)
        }
    }

    #[async_trait]
    impl TransactionManager for LibsqlTransactionManager {
        type Session = LibsqlSession;

        async fn session(&self) -> RepoResult<LibsqlSession> {
            Ok(LibsqlSession::new(self.connection()?))
        }

        async fn execute<R, F, Fut>(&self, def: &TransactionDefinition, f: F) -> RepoResult<R>
        where
            F: FnOnce(LibsqlSession) -> Fut + Send,
            Fut: Future<Output = RepoResult<R>> + Send,
            R: Send,
        {
            let start = Instant::now();
            let conn = self.connection()?;
            if def.read_only {
                pragma(&conn, "PRAGMA query_only = ON")
                    .await
                    .map_err(RepoError::transaction)?;
            }
            // Apply a busy_timeout to reduce spurious SQLITE_BUSY. Use provided timeout or a small default.
            let busy_ms = def.timeout.map(|d| d.as_millis() as i64).unwrap_or(1000);
            pragma(&conn, &format!("PRAGMA busy_timeout = {}", busy_ms))
                .await
                .ok();
            if let Err(e) = conn.execute(begin_sql(def.isolation), ()).await {
                if def.read_only {
                    pragma(&conn, "PRAGMA query_only = OFF").await.ok();
                }
                return Err(RepoError::transaction(e));
            }

            let result = f(LibsqlSession::new(conn.clone())).await;

            let end = if result.is_ok() { "COMMIT" } else { "ROLLBACK" };
            let finished = conn.execute(end, ()).await.map_err(RepoError::transaction);
            if def.read_only {
                pragma(&conn, "PRAGMA query_only = OFF").await.ok();
            }
            obs_record(
                "transaction",
                end,
                start,
                0,
                result.is_ok() && finished.is_ok(),
            );
            match (result, finished) {
                (Ok(value), Ok(_)) => Ok(value),
                (Ok(_), Err(e)) => Err(e),
                (Err(e), finished) => {
                    #[cfg(feature = "tracing")]
                    {
                        if let Err(rb) = &finished {
                            warn!(error = %rb, "rollback failed after error");
                        }
                    }
                    let _ = finished;
                    Err(e)
                }
            }
        }
    }
}

#[cfg(feature = "libsql-backend")]
pub use backend::{LibsqlSession, LibsqlTransactionManager};

#[cfg(all(test, feature = "libsql-backend"))]
mod tests {
    use super::backend::{LibsqlSession, LibsqlTransactionManager};
    use projectit_core::transactions::{
        Isolation, TransactionDefinition, TransactionManager, TransactionTemplate,
    };
    use projectit_core::{EntityRepository, ParamValue, RepoError, Select, Session, UNSAVED_ID};

    #[derive(projectit_macros::Entity, Clone, Debug, PartialEq)]
    #[entity(table = "users", initial_value = 10)]
    struct U {
        #[fetch(not_blank)]
        email: String,
        active: bool,
        #[fetch(id)]
        id: i64,
    }

    const SCHEMA: &str = "CREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL, active INTEGER NOT NULL);";

    async fn setup() -> (tempfile::TempDir, TransactionTemplate<LibsqlTransactionManager>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("units.db");
        let mgr = LibsqlTransactionManager::from_url(&path.display().to_string())
            .await
            .expect("open db");
        mgr.run_script(SCHEMA).await.expect("apply schema");
        (dir, TransactionTemplate::new(mgr))
    }

    fn user(email: &str) -> U {
        U {
            email: email.into(),
            active: true,
            id: UNSAVED_ID,
        }
    }

    #[tokio::test]
    async fn sequence_starts_at_initial_value_and_is_not_reused() {
        let (_dir, tpl) = setup().await;
        let repo = EntityRepository::<U>::new();
        let s = tpl.session().await.unwrap();
        let a = repo.save(&s, user("a@x")).await.unwrap();
        let b = repo.save(&s, user("b@x")).await.unwrap();
        assert_eq!((a.id, b.id), (10, 11));
        assert!(repo.delete_by_id(&s, b.id).await.unwrap());
        let c = repo.save(&s, user("c@x")).await.unwrap();
        assert_eq!(c.id, 12);
    }

    #[tokio::test]
    async fn update_in_place_and_bools_round_trip() {
        let (_dir, tpl) = setup().await;
        let repo = EntityRepository::<U>::new();
        let s = tpl.session().await.unwrap();
        let mut u = repo.save(&s, user("a@x")).await.unwrap();
        u.active = false;
        repo.save(&s, u.clone()).await.unwrap();
        let found = repo.find_by_id(&s, u.id).await.unwrap().unwrap();
        assert_eq!(found, u);
        assert_eq!(repo.count(&s).await.unwrap(), 1);
        let by_email = repo
            .find_by_field(&s, "email", ParamValue::from("a@x"))
            .await
            .unwrap();
        assert_eq!(by_email.len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_writes_and_returns_closure_error() {
        let (_dir, tpl) = setup().await;
        let repo = EntityRepository::<U>::new();
        let r = &repo;
        let err = tpl
            .execute(|s| async move {
                r.save(&s, user("gone@x")).await?;
                Err::<(), _>(RepoError::NotFound)
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::NotFound));
        let s = tpl.session().await.unwrap();
        assert_eq!(repo.count(&s).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_makes_writes_visible() {
        let (_dir, tpl) = setup().await;
        let repo = EntityRepository::<U>::new();
        let r = &repo;
        let def = TransactionDefinition {
            isolation: Isolation::Serializable,
            read_only: false,
            timeout: Some(std::time::Duration::from_millis(500)),
        };
        tpl.execute_with(&def, |s| async move {
            r.save_all(&s, vec![user("a@x"), user("b@x")]).await
        })
        .await
        .unwrap();
        let s = tpl.session().await.unwrap();
        let all = repo.find_all(&s).await.unwrap();
        assert_eq!(
            all.iter().map(|u| u.email.as_str()).collect::<Vec<_>>(),
            vec!["a@x", "b@x"]
        );
    }

    #[tokio::test]
    async fn read_only_transaction_rejects_writes() {
        let (_dir, tpl) = setup().await;
        let err = tpl
            .execute_with(&TransactionDefinition::read_only(), |s: LibsqlSession| async move {
                s.insert(
                    "users",
                    &["id", "email", "active"],
                    vec![ParamValue::I64(1), "x".into(), true.into()],
                )
                .await
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Backend { .. }));
    }

    #[tokio::test]
    async fn unknown_column_surfaces_backend_error() {
        let (_dir, tpl) = setup().await;
        let s = tpl.session().await.unwrap();
        let err = s
            .select(&Select::new("users", &["does_not_exist"]))
            .await
            .unwrap_err();
        let msg = format!("{:?}", err).to_lowercase();
        assert!(msg.contains("no such column") || msg.contains("backend"), "{msg}");
    }

    #[tokio::test]
    async fn in_memory_url_shares_one_connection() {
        let mgr = LibsqlTransactionManager::from_url(":memory:").await.unwrap();
        mgr.run_script(SCHEMA).await.unwrap();
        let tpl = TransactionTemplate::new(mgr);
        let repo = EntityRepository::<U>::new();
        let r = &repo;
        tpl.execute(|s| async move { r.save(&s, user("m@x")).await })
            .await
            .unwrap();
        let s = tpl.manager().session().await.unwrap();
        assert_eq!(repo.count(&s).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_begin_clears_query_only_on_shared_connection() {
        let mgr = LibsqlTransactionManager::from_url(":memory:").await.unwrap();
        mgr.run_script(SCHEMA).await.unwrap();
        let s = mgr.session().await.unwrap();
        // An open transaction on the shared connection makes the next BEGIN fail.
        s.connection().execute("BEGIN", ()).await.unwrap();
        let err = mgr
            .execute(&TransactionDefinition::read_only(), |_s| async {
                Ok::<(), RepoError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RepoError::Transaction { .. }));
        s.connection().execute("ROLLBACK", ()).await.unwrap();

        s.insert(
            "users",
            &["id", "email", "active"],
            vec![ParamValue::I64(1), "x".into(), true.into()],
        )
        .await
        .unwrap();
        assert_eq!(s.count("users").await.unwrap(), 1);
    }
}
