pub mod history;
pub mod mapping;

pub use history::HistoryRepository;
pub use mapping::MappingRepository;
