use sea_orm::entity::prelude::*;
use sea_orm::ActiveValue::Set;

use crate::types::StorageRecord;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub key:        String,
    #[sea_orm(column_type = "Text")]
    pub value:      String,
    pub updated_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<Model> for StorageRecord {
    fn from(model: Model) -> Self {
        StorageRecord {
            key:        model.key,
            value:      model.value,
            updated_at: model.updated_at,
        }
    }
}

impl From<StorageRecord> for ActiveModel {
    fn from(record: StorageRecord) -> Self {
        ActiveModel {
            key:        Set(record.key),
            value:      Set(record.value),
            updated_at: Set(record.updated_at),
        }
    }
}
