//! SQL-backed repository
//!
//! Each call resolves the mapped type's descriptor, takes the cached SQL
//! template for the operation, fills the per-call tokens, binds parameters
//! and runs the statement through the retry pipeline on a fresh connection.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;

use super::operation::RepositoryOperation;
use super::pagination::Pagination;
use super::rows::map_row;
use super::stream::{entity_stream, QueryPlan};
use super::traits::{EntityStream, Repository};
use crate::config::Settings;
use crate::database::{Connection, Connector, PgConnector};
use crate::error::{
    CancelReason, DatabaseError, DatabaseErrorKind, DatabaseOperation, Error, Result,
};
use crate::filter::{translate, Translation};
use crate::mapping::{
    describe_entity, ColumnDescriptor, Entity, EntityDescriptor, Filter, SqlValue,
};
use crate::resilience::{CallSite, RetryPipeline, RetryPolicy};
use crate::sql::{
    batch_parameter, key_set_parameter, OperationKind, ParameterSet, SqlTemplate, Statement,
    TemplateCache, Token, MAX_PARAMETERS,
};

/// Repository over any [`Connector`]
///
/// Cloning is cheap; clones share the template cache.
#[derive(Clone)]
pub struct SqlRepository {
    connector: Arc<dyn Connector>,
    templates: Arc<TemplateCache>,
    pipeline: RetryPipeline,
    query_timeout: Duration,
    mutation_timeout: Duration,
    cancellation: Option<CancellationToken>,
}

impl std::fmt::Debug for SqlRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlRepository")
            .field("pipeline", &self.pipeline)
            .field("query_timeout", &self.query_timeout)
            .field("mutation_timeout", &self.mutation_timeout)
            .field("templates", &self.templates.len())
            .finish_non_exhaustive()
    }
}

impl SqlRepository {
    pub fn new(connector: Arc<dyn Connector>, settings: &Settings) -> Self {
        Self {
            connector,
            templates: Arc::new(TemplateCache::new()),
            pipeline: RetryPipeline::new(RetryPolicy::from(&settings.retry)),
            query_timeout: settings.database.query_timeout(),
            mutation_timeout: settings.database.unit_operation_timeout(),
            cancellation: None,
        }
    }

    /// PostgreSQL repository whose pool connects on first use
    pub fn connect_lazy(settings: &Settings) -> Result<Self> {
        let connector = PgConnector::connect_lazy(&settings.database)?;
        Ok(Self::new(Arc::new(connector), settings))
    }

    /// PostgreSQL repository with an established pool
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let connector = PgConnector::connect(&settings.database).await?;
        Ok(Self::new(Arc::new(connector), settings))
    }

    #[must_use]
    pub fn with_retry_pipeline(mut self, pipeline: RetryPipeline) -> Self {
        self.pipeline = pipeline;
        self
    }

    /// A handle whose calls and streams stop when `token` is cancelled
    ///
    /// While a token is attached the configured timeouts do not apply; the
    /// token's owner decides when to give up.
    #[must_use]
    pub fn with_cancellation(&self, token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..self.clone()
        }
    }

    pub fn templates(&self) -> &TemplateCache {
        &self.templates
    }

    pub(crate) fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone().unwrap_or_default()
    }

    fn timeout_for(&self, operation: RepositoryOperation) -> Duration {
        if operation.is_mutation() {
            self.mutation_timeout
        } else {
            self.query_timeout
        }
    }

    /// Run `call` on a fresh connection per attempt, under the retry pipeline
    ///
    /// Without a caller token each attempt is bounded by the operation's
    /// timeout; expiry yields [`CancelReason::Timeout`] and is not retried.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        site: &CallSite,
        statement: &Statement,
        call: F,
    ) -> Result<T>
    where
        T: Send,
        F: Fn(Box<dyn Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        tracing::debug!(
            operation = %site.operation,
            entity = site.entity,
            parameters = statement.parameters.len(),
            sql = %statement.sql,
            "Executing statement"
        );

        let timeout = self.timeout_for(site.operation);
        let (token, bounded) = match &self.cancellation {
            Some(token) => (token.clone(), false),
            None => (CancellationToken::new(), true),
        };
        let connector = &self.connector;
        let call = &call;

        self.pipeline
            .execute(site, &token, move || async move {
                let attempt = async move { call(connector.open().await?).await };
                if bounded {
                    tokio::time::timeout(timeout, attempt)
                        .await
                        .map_err(|_| Error::Cancelled(CancelReason::Timeout(timeout)))?
                } else {
                    attempt.await
                }
            })
            .await
    }

    async fn scalar(&self, site: &CallSite, statement: &Statement) -> Result<Option<SqlValue>> {
        self.run(site, statement, move |mut connection| async move {
            connection.execute_scalar(statement).await
        })
        .await
    }

    async fn non_query(&self, site: &CallSite, statement: &Statement) -> Result<u64> {
        self.run(site, statement, move |mut connection| async move {
            connection.execute_non_query(statement).await
        })
        .await
    }

    /// First mapped row of a reader, skipping rows with a NULL leading column
    async fn first_row<E: Entity>(
        &self,
        site: &CallSite,
        statement: &Statement,
        descriptor: &EntityDescriptor,
    ) -> Result<Option<E>> {
        self.run(site, statement, move |connection| async move {
            let mut rows = connection.execute_reader(statement.clone());
            while let Some(row) = rows.next().await {
                if let Some(entity) = map_row::<E>(descriptor, row?)? {
                    return Ok(Some(entity));
                }
            }
            Ok(None)
        })
        .await
    }

    fn by_key<E: Entity>(
        &self,
        descriptor: &EntityDescriptor,
        kind: OperationKind,
        id: i64,
    ) -> Result<Statement> {
        let template = self.templates.template::<E>(kind, None)?;
        let key = descriptor.primary_key()?;
        let mut parameters = ParameterSet::new();
        parameters.insert(key.property_name.clone(), key.db_type, SqlValue::Integer(id))?;
        Ok(Statement::new(template.as_ref(), parameters))
    }

    fn select_statement<F: Filter>(
        &self,
        kind: OperationKind,
        filter: &F,
        pagination: &Pagination,
    ) -> Result<(Arc<EntityDescriptor>, Statement)> {
        let descriptor = describe_entity::<F::Entity>()?;
        let translation = translate(filter)?;
        let template = self.templates.template::<F::Entity>(kind, None)?;
        let sql = SqlTemplate::new(template.as_ref())
            .fill_opt(Token::Where, translation.where_clause.as_deref())
            .fill_opt(Token::OrderBy, pagination.order_by_clause().as_deref())
            .fill_opt(Token::Limit, pagination.limit_clause().as_deref())
            .fill_opt(Token::Offset, pagination.offset_clause().as_deref())
            .finish();
        Ok((descriptor, Statement::new(sql, translation.parameters)))
    }

    fn filtered_delete<E: Entity>(&self, translation: Translation) -> Result<Statement> {
        let template = self.templates.template::<E>(OperationKind::Delete, None)?;
        let sql = SqlTemplate::new(template.as_ref())
            .fill_opt(Token::Where, translation.where_clause.as_deref())
            .finish();
        Ok(Statement::new(sql, translation.parameters))
    }

    async fn count_matching<F: Filter>(
        &self,
        operation: RepositoryOperation,
        filter: &F,
    ) -> Result<i64> {
        let descriptor = describe_entity::<F::Entity>()?;
        let translation = translate(filter)?;
        let template = self
            .templates
            .template::<F::Entity>(OperationKind::Count, None)?;
        let sql = SqlTemplate::new(template.as_ref())
            .fill_opt(Token::Where, translation.where_clause.as_deref())
            .finish();
        let statement = Statement::new(sql, translation.parameters);
        count_of(self.scalar(&site(operation, &descriptor), &statement).await?)
    }

    fn stream_matching<F: Filter>(
        &self,
        operation: RepositoryOperation,
        kind: OperationKind,
        filter: &F,
        pagination: Pagination,
    ) -> EntityStream<F::Entity> {
        let plan = self
            .select_statement(kind, filter, &pagination)
            .map(|(descriptor, statement)| QueryPlan {
                repository: self.clone(),
                site: site(operation, &descriptor),
                statement,
                descriptor,
            });
        match plan {
            Ok(_) if pagination.is_empty_page() => stream::empty().boxed(),
            plan => entity_stream(plan),
        }
    }
}

impl Repository for SqlRepository {
    async fn exists<E: Entity>(&self, id: i64) -> Result<bool> {
        let descriptor = describe_entity::<E>()?;
        let statement = self.by_key::<E>(&descriptor, OperationKind::ExistsByKey, id)?;
        let count = self
            .scalar(&site(RepositoryOperation::Exists, &descriptor), &statement)
            .await?;
        Ok(count_of(count)? > 0)
    }

    async fn exists_matching<F: Filter>(&self, filter: &F) -> Result<bool> {
        Ok(self
            .count_matching(RepositoryOperation::ExistsMatching, filter)
            .await?
            > 0)
    }

    async fn count<F: Filter>(&self, filter: &F) -> Result<i64> {
        self.count_matching(RepositoryOperation::Count, filter).await
    }

    async fn get_by_key<E: Entity>(&self, id: i64) -> Result<Option<E>> {
        let descriptor = describe_entity::<E>()?;
        let statement = self.by_key::<E>(&descriptor, OperationKind::SelectByKey, id)?;
        self.first_row(
            &site(RepositoryOperation::GetByKey, &descriptor),
            &statement,
            &descriptor,
        )
        .await
    }

    async fn get_first<F: Filter>(&self, filter: &F) -> Result<Option<F::Entity>> {
        let (descriptor, statement) = self.select_statement(
            OperationKind::Select,
            filter,
            &Pagination::unbounded().with_limit(1),
        )?;
        self.first_row(
            &site(RepositoryOperation::GetFirst, &descriptor),
            &statement,
            &descriptor,
        )
        .await
    }

    fn query<F: Filter>(&self, filter: &F, pagination: Pagination) -> EntityStream<F::Entity> {
        self.stream_matching(
            RepositoryOperation::Query,
            OperationKind::Select,
            filter,
            pagination,
        )
    }

    fn query_distinct<F: Filter>(
        &self,
        filter: &F,
        pagination: Pagination,
    ) -> EntityStream<F::Entity> {
        self.stream_matching(
            RepositoryOperation::QueryDistinct,
            OperationKind::SelectDistinct,
            filter,
            pagination,
        )
    }

    async fn delete_all<E: Entity>(&self) -> Result<u64> {
        let descriptor = describe_entity::<E>()?;
        let statement = self.filtered_delete::<E>(Translation::default())?;
        self.non_query(&site(RepositoryOperation::DeleteAll, &descriptor), &statement)
            .await
    }

    async fn delete_by_key<E: Entity>(&self, id: i64) -> Result<u64> {
        let descriptor = describe_entity::<E>()?;
        let statement = self.by_key::<E>(&descriptor, OperationKind::DeleteByKey, id)?;
        self.non_query(&site(RepositoryOperation::DeleteByKey, &descriptor), &statement)
            .await
    }

    async fn delete<F: Filter>(&self, filter: &F) -> Result<u64> {
        let descriptor = describe_entity::<F::Entity>()?;
        let translation = mutation_filter(RepositoryOperation::Delete, &descriptor, filter)?;
        let statement = self.filtered_delete::<F::Entity>(translation)?;
        self.non_query(&site(RepositoryOperation::Delete, &descriptor), &statement)
            .await
    }

    async fn insert<E: Entity>(&self, entity: &E) -> Result<i64> {
        let descriptor = describe_entity::<E>()?;
        let template = self.templates.template::<E>(OperationKind::Insert, None)?;
        let mut parameters = ParameterSet::new();
        bind_columns(&descriptor, entity, descriptor.insert_columns(), None, &mut parameters)?;
        let statement = Statement::new(template.as_ref(), parameters);

        match self
            .scalar(&site(RepositoryOperation::Insert, &descriptor), &statement)
            .await?
        {
            Some(key) if !key.is_null() => Ok(i64::try_from(key)?),
            _ => Err(DatabaseError::new(
                DatabaseOperation::Scalar,
                DatabaseErrorKind::QueryFailed,
                format!("insert of {} returned no key", descriptor.type_name),
            )
            .into()),
        }
    }

    async fn insert_batch<E: Entity>(&self, entities: &[E]) -> Result<Vec<i64>> {
        if entities.is_empty() {
            return Ok(Vec::new());
        }
        let descriptor = describe_entity::<E>()?;
        let parameters = batch_parameters(&descriptor, entities)?;
        within_parameter_limit(RepositoryOperation::InsertBatch, &descriptor, &parameters)?;
        let template = self
            .templates
            .template::<E>(OperationKind::BulkInsert, Some(entities.len()))?;
        let statement = Statement::new(template.as_ref(), parameters);

        let keys = self
            .scalar(&site(RepositoryOperation::InsertBatch, &descriptor), &statement)
            .await?;
        generated_keys(&descriptor, keys, entities.len())
    }

    async fn upsert<F: Filter>(&self, entities: &[F::Entity], filter: &F) -> Result<Vec<i64>> {
        let descriptor = describe_entity::<F::Entity>()?;
        let translation = mutation_filter(RepositoryOperation::Upsert, &descriptor, filter)?;
        let site = site(RepositoryOperation::Upsert, &descriptor);

        if entities.is_empty() {
            // Nothing to insert: only the purge runs.
            let statement = self.filtered_delete::<F::Entity>(translation)?;
            self.non_query(&site, &statement).await?;
            return Ok(Vec::new());
        }

        let mut parameters = batch_parameters(&descriptor, entities)?;
        parameters.extend(translation.parameters)?;
        within_parameter_limit(RepositoryOperation::Upsert, &descriptor, &parameters)?;
        let template = self
            .templates
            .template::<F::Entity>(OperationKind::InsertWithUpsert, Some(entities.len()))?;
        let sql = SqlTemplate::new(template.as_ref())
            .fill_opt(Token::Where, translation.where_clause.as_deref())
            .finish();
        let statement = Statement::new(sql, parameters);

        let keys = self.scalar(&site, &statement).await?;
        generated_keys(&descriptor, keys, entities.len())
    }

    async fn update<E: Entity>(&self, entity: &E) -> Result<u64> {
        let descriptor = describe_entity::<E>()?;
        let template = self.templates.template::<E>(OperationKind::UpdateByKey, None)?;
        let mut parameters = ParameterSet::new();
        bind_columns(&descriptor, entity, descriptor.columns.iter(), None, &mut parameters)?;
        let statement = Statement::new(template.as_ref(), parameters);
        self.non_query(&site(RepositoryOperation::Update, &descriptor), &statement)
            .await
    }
}

fn site(operation: RepositoryOperation, descriptor: &EntityDescriptor) -> CallSite {
    CallSite::new(operation, descriptor.type_name, module_path!())
}

fn count_of(value: Option<SqlValue>) -> Result<i64> {
    match value {
        Some(value) if !value.is_null() => Ok(i64::try_from(value)?),
        _ => Ok(0),
    }
}

/// Translate a filter for a DELETE, which has no joins to qualify against
fn mutation_filter<F: Filter>(
    operation: RepositoryOperation,
    descriptor: &EntityDescriptor,
    filter: &F,
) -> Result<Translation> {
    let translation = translate(filter)?;
    if translation.uses_joined_tables {
        return Err(Error::configuration(format!(
            "{} of {} cannot filter on joined tables",
            operation, descriptor.type_name
        )));
    }
    Ok(translation)
}

fn property_value<E: Entity>(
    descriptor: &EntityDescriptor,
    entity: &E,
    column: &ColumnDescriptor,
) -> Result<SqlValue> {
    entity.value_of(&column.property_name).ok_or_else(|| {
        Error::configuration(format!(
            "{} exposes no value for property '{}'",
            descriptor.type_name, column.property_name
        ))
    })
}

/// Bind `columns` of `entity`, suffixed with the batch `index` when given
fn bind_columns<'a, E: Entity>(
    descriptor: &EntityDescriptor,
    entity: &E,
    columns: impl Iterator<Item = &'a ColumnDescriptor>,
    index: Option<usize>,
    parameters: &mut ParameterSet,
) -> Result<()> {
    for column in columns {
        let value = property_value(descriptor, entity, column)?;
        let name = match index {
            Some(index) => batch_parameter(&column.property_name, index),
            None => column.property_name.clone(),
        };
        parameters.insert(name, column.db_type, value)?;
    }
    Ok(())
}

/// Per-row value groups plus one key-set array per unique column
fn batch_parameters<E: Entity>(
    descriptor: &EntityDescriptor,
    entities: &[E],
) -> Result<ParameterSet> {
    let mut parameters = ParameterSet::with_capacity(
        entities.len() * descriptor.insert_columns().count() + descriptor.unique_columns().count(),
    );
    for (index, entity) in entities.iter().enumerate() {
        bind_columns(
            descriptor,
            entity,
            descriptor.insert_columns(),
            Some(index),
            &mut parameters,
        )?;
    }

    for column in descriptor.unique_columns() {
        let array_type = column.db_type.array().ok_or_else(|| {
            Error::configuration(format!(
                "unique column '{}' of {} has type {}, which cannot be matched as a set",
                column.property_name, descriptor.type_name, column.db_type
            ))
        })?;
        let values = entities
            .iter()
            .map(|entity| property_value(descriptor, entity, column))
            .collect::<Result<Vec<_>>>()?;
        reject_repeated_keys(descriptor, column, &values)?;
        parameters.insert(
            key_set_parameter(&column.property_name),
            array_type,
            SqlValue::collect_array(column.db_type, values)?,
        )?;
    }
    Ok(parameters)
}

/// A batch may not carry the same unique key twice
fn reject_repeated_keys(
    descriptor: &EntityDescriptor,
    column: &ColumnDescriptor,
    values: &[SqlValue],
) -> Result<()> {
    let mut seen = HashSet::with_capacity(values.len());
    for value in values {
        let Some(key) = value.key() else { continue };
        if !seen.insert(key) {
            return Err(Error::configuration(format!(
                "batch of {} repeats unique {} value {:?}",
                descriptor.type_name, column.property_name, value
            )));
        }
    }
    Ok(())
}

fn within_parameter_limit(
    operation: RepositoryOperation,
    descriptor: &EntityDescriptor,
    parameters: &ParameterSet,
) -> Result<()> {
    if parameters.len() > MAX_PARAMETERS {
        return Err(Error::configuration(format!(
            "{} of {} binds {} parameters, more than the {} one statement allows",
            operation,
            descriptor.type_name,
            parameters.len(),
            MAX_PARAMETERS
        )));
    }
    Ok(())
}

fn generated_keys(
    descriptor: &EntityDescriptor,
    value: Option<SqlValue>,
    expected: usize,
) -> Result<Vec<i64>> {
    let keys = match value {
        Some(value) if !value.is_null() => Vec::<i64>::try_from(value)?,
        _ => Vec::new(),
    };
    if keys.len() != expected {
        return Err(DatabaseError::new(
            DatabaseOperation::Scalar,
            DatabaseErrorKind::QueryFailed,
            format!(
                "batch of {} {} rows returned {} keys",
                expected,
                descriptor.type_name,
                keys.len()
            ),
        )
        .into());
    }
    Ok(keys)
}
