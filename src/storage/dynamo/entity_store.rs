//! DynamoDB EntityStore implementation.

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client;
use tracing::debug;

use super::conversions::{attributes_to_item, item_to_attributes};
use crate::storage::schema::{ATTR_ID, ATTR_SK, ATTR_VERSION, CATALOG};
use crate::storage::{
    validate_item, EntityStore, Item, PageToken, QueryOptions, QueryPage, QuerySource, Result,
    StorageError, WriteCondition,
};

/// A `ConditionExpression` with its placeholders.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ConditionExpr {
    pub expression: &'static str,
    pub names: Vec<(&'static str, &'static str)>,
    pub values: Vec<(&'static str, AttributeValue)>,
}

/// Translate a write condition. `Always` needs no expression.
pub(crate) fn condition_expression(condition: WriteCondition) -> Option<ConditionExpr> {
    match condition {
        WriteCondition::Always => None,
        WriteCondition::MustNotExist => Some(ConditionExpr {
            expression: "attribute_not_exists(#id)",
            names: vec![("#id", ATTR_ID)],
            values: Vec::new(),
        }),
        // Rows written before versioning carry no `version` and count as 0.
        WriteCondition::VersionEquals(0) => Some(ConditionExpr {
            expression: "attribute_exists(#id) AND (attribute_not_exists(#version) OR #version = :version)",
            names: vec![("#id", ATTR_ID), ("#version", ATTR_VERSION)],
            values: vec![(":version", AttributeValue::N("0".to_string()))],
        }),
        WriteCondition::VersionEquals(v) => Some(ConditionExpr {
            expression: "attribute_exists(#id) AND #version = :version",
            names: vec![("#id", ATTR_ID), ("#version", ATTR_VERSION)],
            values: vec![(":version", AttributeValue::N(v.to_string()))],
        }),
    }
}

/// DynamoDB implementation of EntityStore over the shared table.
#[derive(Clone)]
pub struct DynamoEntityStore {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoEntityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoEntityStore")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoEntityStore {
    pub fn new(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key(id: &str, sk: &str) -> [(String, AttributeValue); 2] {
        [
            (ATTR_ID.to_string(), AttributeValue::S(id.to_string())),
            (ATTR_SK.to_string(), AttributeValue::S(sk.to_string())),
        ]
    }
}

#[async_trait]
impl EntityStore for DynamoEntityStore {
    async fn put_conditional(&self, item: Item, condition: WriteCondition) -> Result<()> {
        let key = validate_item(&item)?;

        let mut request = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(item_to_attributes(&item)));

        if let Some(expr) = condition_expression(condition) {
            request = request.condition_expression(expr.expression);
            for (placeholder, attr) in expr.names {
                request = request.expression_attribute_names(placeholder, attr);
            }
            for (placeholder, value) in expr.values {
                request = request.expression_attribute_values(placeholder, value);
            }
        }

        match request.send().await {
            Ok(_) => Ok(()),
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_conditional_check_failed_exception()) =>
            {
                debug!(%key, ?condition, "Conditional put rejected");
                Err(StorageError::ConditionFailed { key })
            }
            Err(e) => Err(StorageError::Dynamo(format!(
                "PutItem failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }

    async fn get_one(&self, id: &str, sk: &str) -> Result<Option<Item>> {
        let [pk, rk] = Self::key(id, sk);
        let response = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key(pk.0, pk.1)
            .key(rk.0, rk.1)
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| {
                StorageError::Dynamo(format!("GetItem failed: {}", DisplayErrorContext(&e)))
            })?;

        Ok(response.item().map(attributes_to_item))
    }

    async fn delete(&self, id: &str, sk: &str) -> Result<()> {
        let [pk, rk] = Self::key(id, sk);
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .key(pk.0, pk.1)
            .key(rk.0, rk.1)
            .send()
            .await
            .map_err(|e| {
                StorageError::Dynamo(format!("DeleteItem failed: {}", DisplayErrorContext(&e)))
            })?;
        Ok(())
    }

    async fn query_page(
        &self,
        source: QuerySource<'_>,
        partition_value: &str,
        options: &QueryOptions,
    ) -> Result<QueryPage> {
        let (index_name, key_schema) = match source {
            QuerySource::Table => (None, CATALOG.key_schema),
            QuerySource::Index(name) => {
                let index = CATALOG
                    .index(name)
                    .ok_or_else(|| StorageError::UnknownIndex(name.to_string()))?;
                (Some(index.name), index.key_schema)
            }
        };

        // DynamoDB rejects Limit < 1.
        if options.limit == Some(0) {
            return Ok(QueryPage::default());
        }

        let mut request = self
            .client
            .query()
            .table_name(&self.table_name)
            .set_index_name(index_name.map(str::to_string))
            .expression_attribute_names("#pk", key_schema.partition_key)
            .expression_attribute_values(":pk", AttributeValue::S(partition_value.to_string()));

        request = match options.sort_key_prefix.as_deref() {
            Some(prefix) => request
                .key_condition_expression("#pk = :pk AND begins_with(#sk, :prefix)")
                .expression_attribute_names("#sk", key_schema.sort_key)
                .expression_attribute_values(":prefix", AttributeValue::S(prefix.to_string())),
            None => request.key_condition_expression("#pk = :pk"),
        };

        if let Some(limit) = options.limit {
            request = request.limit(i32::try_from(limit).unwrap_or(i32::MAX));
        }
        if let Some(token) = &options.start_after {
            request = request.set_exclusive_start_key(Some(item_to_attributes(&token.0)));
        }

        let response = request.send().await.map_err(|e| {
            StorageError::Dynamo(format!("Query failed: {}", DisplayErrorContext(&e)))
        })?;

        let items = response.items().iter().map(attributes_to_item).collect();
        let next = match response.last_evaluated_key() {
            Some(key) if !key.is_empty() => Some(PageToken(attributes_to_item(key))),
            _ => None,
        };

        Ok(QueryPage { items, next })
    }
}
