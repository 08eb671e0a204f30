//! Document entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "documents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Natural key used for upserts
    #[sea_orm(column_type = "Text", unique)]
    pub url: String,

    /// Type-tagged category metadata as JSONB
    #[sea_orm(column_type = "JsonBinary")]
    pub metadata_map: Json,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::conversation_document::Entity")]
    ConversationDocuments,
}

impl Related<super::conversation_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversationDocuments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
