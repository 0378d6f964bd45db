mod helpers;
mod tests_compaction;
