use super::{Connection, Executor};
use crate::error::{DriverError, QueryError, QueryResult};
use crate::model::{IsolationLevel, Options, Parameters};
use crate::result::ExecutionResult;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use tracing::{debug, warn};

struct ConnectionState<C> {
    connection: C,
    /// Isolation level active before an override, keyed by the nesting depth
    /// at which the override was made
    saved_isolation: BTreeMap<usize, IsolationLevel>,
}

/// [`Executor`] over a single [`Connection`]
///
/// The connection sits behind a mutex; one executor is one connection with
/// single-writer access. Isolation overrides requested through
/// [`Options::with_isolation`] are undone once the transaction level that
/// introduced them commits or rolls back.
pub struct ConnectionExecutor<C: Connection> {
    label: String,
    state: Mutex<ConnectionState<C>>,
}

impl<C: Connection> ConnectionExecutor<C> {
    /// Wrap a connection; `label` names it in error messages
    pub fn new<S: Into<String>>(label: S, connection: C) -> Self {
        Self {
            label: label.into(),
            state: Mutex::new(ConnectionState {
                connection,
                saved_isolation: BTreeMap::new(),
            }),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run a closure against the underlying connection
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> R {
        f(&mut self.state.lock().connection)
    }

    fn current_isolation(&self, state: &mut ConnectionState<C>) -> QueryResult<IsolationLevel> {
        state.connection.isolation_level().map_err(|err| {
            QueryError::runtime(
                format!(
                    "Unable to read transaction isolation level of \"{}\" connection.",
                    self.label
                ),
                err,
            )
        })
    }

    fn apply_isolation(
        &self,
        state: &mut ConnectionState<C>,
        level: IsolationLevel,
    ) -> QueryResult<()> {
        state.connection.set_isolation_level(level).map_err(|err| {
            QueryError::runtime(
                format!(
                    "Unable to set transaction isolation level \"{}\" on \"{}\" connection.",
                    level, self.label
                ),
                err,
            )
        })
    }

    /// The requested level when it differs from the connection's current one
    fn isolation_override(
        &self,
        state: &mut ConnectionState<C>,
        options: &Options,
    ) -> QueryResult<Option<IsolationLevel>> {
        let Some(requested) = options.isolation() else {
            return Ok(None);
        };
        let current = self.current_isolation(state)?;
        Ok((requested != current).then_some(requested))
    }

    fn begin(&self, state: &mut ConnectionState<C>, options: &Options) -> QueryResult<()> {
        let depth = state.connection.transaction_nesting_level();
        let mut saved = None;

        if let Some(level) = options.isolation() {
            let previous = self.current_isolation(state)?;
            if level != previous {
                debug!(
                    connection = %self.label,
                    depth,
                    from = %previous,
                    to = %level,
                    "Overriding transaction isolation level"
                );
                self.apply_isolation(state, level)?;
                state.saved_isolation.insert(depth, previous);
                saved = Some(previous);
            }
        }

        if let Err(err) = state.connection.begin_transaction() {
            if let Some(previous) = saved {
                state.saved_isolation.remove(&depth);
                if let Err(restore) = state.connection.set_isolation_level(previous) {
                    warn!(
                        connection = %self.label,
                        error = %restore,
                        "Failed to restore isolation level after begin failure"
                    );
                }
            }
            return Err(QueryError::transaction(
                format!("Failed to begin transaction using \"{}\" connection.", self.label),
                err,
            ));
        }

        Ok(())
    }

    fn commit_locked(&self, state: &mut ConnectionState<C>) -> QueryResult<()> {
        state.connection.commit().map_err(|err| {
            QueryError::transaction(
                format!("Failed to commit transaction using \"{}\" connection.", self.label),
                err,
            )
        })?;
        self.restore_isolation(state)
    }

    fn rollback_locked(&self, state: &mut ConnectionState<C>) -> QueryResult<()> {
        state.connection.rollback().map_err(|err| {
            QueryError::transaction(
                format!(
                    "Failed to rollback transaction using \"{}\" connection.",
                    self.label
                ),
                err,
            )
        })?;
        self.restore_isolation(state)
    }

    fn restore_isolation(&self, state: &mut ConnectionState<C>) -> QueryResult<()> {
        let depth = state.connection.transaction_nesting_level();
        if let Some(previous) = state.saved_isolation.remove(&depth) {
            debug!(
                connection = %self.label,
                depth,
                level = %previous,
                "Restoring transaction isolation level"
            );
            self.apply_isolation(state, previous)?;
        }
        Ok(())
    }

    fn execute_isolated(
        &self,
        state: &mut ConnectionState<C>,
        query: &str,
        params: &Parameters,
        options: &Options,
        level: IsolationLevel,
    ) -> QueryResult<ExecutionResult> {
        self.begin(state, options)?;

        let failure = |err: DriverError| {
            QueryError::execution(
                format!(
                    "Execution of query \"{}\" failed within transactional scope using \"{}\" connection and isolation level \"{}\".",
                    query, self.label, level
                ),
                err,
            )
        };

        // Rows are read before commit so nothing is left pending on the cursor
        let outcome = state
            .connection
            .execute_query(query, params)
            .map_err(failure)
            .and_then(|cursor| ExecutionResult::from_boxed(cursor).materialize())
            .and_then(|result| {
                state
                    .connection
                    .commit()
                    .map(|()| result)
                    .map_err(failure)
            });

        match outcome {
            Ok(result) => {
                self.restore_isolation(state)?;
                Ok(ExecutionResult::from(result))
            }
            Err(err) => {
                if let Err(rollback) = self.rollback_locked(state) {
                    warn!(
                        connection = %self.label,
                        error = %rollback,
                        "Rollback of isolated statement failed"
                    );
                }
                Err(err)
            }
        }
    }
}

impl<C: Connection> Executor for ConnectionExecutor<C> {
    fn execute(
        &self,
        query: &str,
        params: &Parameters,
        options: &Options,
    ) -> QueryResult<ExecutionResult> {
        let mut state = self.state.lock();

        if let Some(level) = self.isolation_override(&mut state, options)? {
            return self.execute_isolated(&mut state, query, params, options, level);
        }

        debug!(connection = %self.label, "Executing query");
        state
            .connection
            .execute_query(query, params)
            .map(ExecutionResult::from_boxed)
            .map_err(|err| {
                QueryError::execution(format!("Execution of query failed (\"{}\").", query), err)
            })
    }

    fn begin_transaction(&self, options: &Options) -> QueryResult<()> {
        let mut state = self.state.lock();
        self.begin(&mut state, options)
    }

    fn commit(&self) -> QueryResult<()> {
        let mut state = self.state.lock();
        self.commit_locked(&mut state)
    }

    fn rollback(&self) -> QueryResult<()> {
        let mut state = self.state.lock();
        self.rollback_locked(&mut state)
    }
}
