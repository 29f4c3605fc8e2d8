//! DynamoDB schema administration (DescribeTable / CreateTable).

use async_trait::async_trait;
use aws_sdk_dynamodb::error::{BuildError, DisplayErrorContext};
use aws_sdk_dynamodb::types::{
    AttributeDefinition, BillingMode as DynamoBillingMode, GlobalSecondaryIndex, KeySchemaElement,
    KeyType, Projection, ProjectionType, ProvisionedThroughput, ScalarAttributeType,
    TableStatus as DynamoTableStatus,
};
use aws_sdk_dynamodb::Client;
use tracing::debug;

use crate::config::{BillingMode, Capacity, StorageConfig};
use crate::provisioning::{AdminError, TableAdmin, TableDescription, TableStatus};
use crate::storage::schema::KeySchema;
use crate::storage::SchemaCatalog;

/// Creates and describes the shared table.
#[derive(Clone)]
pub struct DynamoTableAdmin {
    client: Client,
    billing_mode: BillingMode,
    table_capacity: Capacity,
    index_capacity: Capacity,
}

impl std::fmt::Debug for DynamoTableAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoTableAdmin")
            .field("billing_mode", &self.billing_mode)
            .finish()
    }
}

impl DynamoTableAdmin {
    pub fn new(client: Client, config: &StorageConfig) -> Self {
        Self {
            client,
            billing_mode: config.billing_mode,
            table_capacity: config.table_capacity,
            index_capacity: config.index_capacity,
        }
    }

    fn throughput(&self, capacity: Capacity) -> Result<Option<ProvisionedThroughput>, BuildError> {
        match self.billing_mode {
            BillingMode::PayPerRequest => Ok(None),
            BillingMode::Provisioned => ProvisionedThroughput::builder()
                .read_capacity_units(capacity.read)
                .write_capacity_units(capacity.write)
                .build()
                .map(Some),
        }
    }
}

fn map_status(status: Option<&DynamoTableStatus>) -> TableStatus {
    match status {
        Some(DynamoTableStatus::Active) => TableStatus::Active,
        Some(DynamoTableStatus::Creating) => TableStatus::Creating,
        Some(DynamoTableStatus::Updating) => TableStatus::Updating,
        Some(DynamoTableStatus::Deleting) => TableStatus::Deleting,
        _ => TableStatus::Other,
    }
}

fn key_schema(schema: &KeySchema) -> Result<Vec<KeySchemaElement>, BuildError> {
    Ok(vec![
        KeySchemaElement::builder()
            .attribute_name(schema.partition_key)
            .key_type(KeyType::Hash)
            .build()?,
        KeySchemaElement::builder()
            .attribute_name(schema.sort_key)
            .key_type(KeyType::Range)
            .build()?,
    ])
}

fn attribute_definitions(catalog: &SchemaCatalog) -> Result<Vec<AttributeDefinition>, BuildError> {
    catalog
        .attributes
        .iter()
        .map(|attr| {
            AttributeDefinition::builder()
                .attribute_name(*attr)
                .attribute_type(ScalarAttributeType::S)
                .build()
        })
        .collect()
}

fn build_failed(e: BuildError) -> AdminError {
    AdminError::Service(format!("Invalid CreateTable request: {e}"))
}

#[async_trait]
impl TableAdmin for DynamoTableAdmin {
    async fn describe_table(
        &self,
        table_name: &str,
    ) -> Result<Option<TableDescription>, AdminError> {
        let response = match self.client.describe_table().table_name(table_name).send().await {
            Ok(response) => response,
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception()) =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(AdminError::Service(format!(
                    "DescribeTable failed: {}",
                    DisplayErrorContext(&e)
                )))
            }
        };

        let Some(table) = response.table() else {
            return Ok(None);
        };

        Ok(Some(TableDescription {
            status: map_status(table.table_status()),
            index_names: table
                .global_secondary_indexes()
                .iter()
                .filter_map(|gsi| gsi.index_name().map(str::to_string))
                .collect(),
        }))
    }

    async fn create_table(
        &self,
        table_name: &str,
        catalog: &SchemaCatalog,
    ) -> Result<(), AdminError> {
        let mut indexes = Vec::with_capacity(catalog.indexes.len());
        for index in catalog.indexes {
            let gsi = GlobalSecondaryIndex::builder()
                .index_name(index.name)
                .set_key_schema(Some(key_schema(&index.key_schema).map_err(build_failed)?))
                .projection(
                    Projection::builder()
                        .projection_type(ProjectionType::All)
                        .build(),
                )
                .set_provisioned_throughput(
                    self.throughput(self.index_capacity).map_err(build_failed)?,
                )
                .build()
                .map_err(build_failed)?;
            indexes.push(gsi);
        }

        let billing_mode = match self.billing_mode {
            BillingMode::Provisioned => DynamoBillingMode::Provisioned,
            BillingMode::PayPerRequest => DynamoBillingMode::PayPerRequest,
        };

        let result = self
            .client
            .create_table()
            .table_name(table_name)
            .set_attribute_definitions(Some(attribute_definitions(catalog).map_err(build_failed)?))
            .set_key_schema(Some(key_schema(&catalog.key_schema).map_err(build_failed)?))
            .set_global_secondary_indexes(Some(indexes))
            .billing_mode(billing_mode)
            .set_provisioned_throughput(self.throughput(self.table_capacity).map_err(build_failed)?)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(table = %table_name, "CreateTable accepted");
                Ok(())
            }
            Err(e)
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_in_use_exception()) =>
            {
                Err(AdminError::AlreadyExists(table_name.to_string()))
            }
            Err(e) => Err(AdminError::Service(format!(
                "CreateTable failed: {}",
                DisplayErrorContext(&e)
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CATALOG;

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_status(Some(&DynamoTableStatus::Active)), TableStatus::Active);
        assert_eq!(map_status(Some(&DynamoTableStatus::Creating)), TableStatus::Creating);
        assert_eq!(map_status(Some(&DynamoTableStatus::Archived)), TableStatus::Other);
        assert_eq!(map_status(None), TableStatus::Other);
    }

    #[test]
    fn test_attribute_definitions_are_strings() {
        let defs = attribute_definitions(&CATALOG).unwrap();
        assert_eq!(defs.len(), CATALOG.attributes.len());
        assert!(defs
            .iter()
            .all(|d| d.attribute_type() == &ScalarAttributeType::S));
    }

    #[test]
    fn test_key_schema_is_hash_then_range() {
        let elements = key_schema(&CATALOG.key_schema).unwrap();
        assert_eq!(elements[0].attribute_name(), "id");
        assert_eq!(elements[0].key_type(), &KeyType::Hash);
        assert_eq!(elements[1].attribute_name(), "sk");
        assert_eq!(elements[1].key_type(), &KeyType::Range);
    }
}
