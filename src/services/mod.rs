pub mod aggregator;
pub mod backend;
pub mod config_loader;
pub mod participant_filter;
pub mod persistence;
pub mod quick_fill;
pub mod rubric_repository;
pub mod score_sheet;
pub mod sequencer;
pub mod store;
pub mod submission;
