//! SeaORM entity models
//!
//! Database entities for documents, conversations and messages

mod conversation;
mod conversation_document;
mod document;
mod message;
mod message_sub_process;

pub use document::{
    Entity as DocumentEntity,
    Model as DocumentRow,
    ActiveModel as DocumentActiveModel,
    Column as DocumentColumn,
};

pub use conversation::{
    Entity as ConversationEntity,
    Model as ConversationRow,
    ActiveModel as ConversationActiveModel,
    Column as ConversationColumn,
};

pub use conversation_document::{
    Entity as ConversationDocumentEntity,
    Model as ConversationDocumentRow,
    ActiveModel as ConversationDocumentActiveModel,
    Column as ConversationDocumentColumn,
};

pub use message::{
    Entity as MessageEntity,
    Model as MessageRow,
    ActiveModel as MessageActiveModel,
    Column as MessageColumn,
};

pub use message_sub_process::{
    Entity as MessageSubProcessEntity,
    Model as MessageSubProcessRow,
    ActiveModel as MessageSubProcessActiveModel,
    Column as MessageSubProcessColumn,
};
