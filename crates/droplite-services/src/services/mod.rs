pub mod files;
mod limit;
