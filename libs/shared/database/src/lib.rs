pub mod memory;
pub mod postgrest;
pub mod store;
pub mod supabase;

pub use memory::InMemoryStore;
pub use postgrest::SupabaseStore;
pub use store::{AccountStore, AppointmentStore, StoreError, VerificationStore};
pub use supabase::{ApiError, SupabaseClient};
