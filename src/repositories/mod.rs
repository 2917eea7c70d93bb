pub mod calendar_event;
pub mod crm;
pub mod email;
pub mod embedding_queue;
pub mod handbook;
pub mod integration;
pub mod message;
pub mod sync_run;
pub mod user;

pub use calendar_event::CalendarEventRepository;
pub use crm::CrmRepository;
pub use email::EmailRepository;
pub use embedding_queue::EmbeddingQueueRepository;
pub use handbook::HandbookRepository;
pub use integration::IntegrationRepository;
pub use message::MessageRepository;
pub use sync_run::SyncRunRepository;
pub use user::UserRepository;
