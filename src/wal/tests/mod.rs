mod helpers;
mod tests_truncation;
