//! Conversation entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "conversations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::message::Entity", on_delete = "Cascade")]
    Messages,

    #[sea_orm(has_many = "super::conversation_document::Entity", on_delete = "Cascade")]
    ConversationDocuments,
}

impl Related<super::message::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Messages.def()
    }
}

impl Related<super::conversation_document::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ConversationDocuments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
