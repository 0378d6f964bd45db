mod helpers;
mod tests_execute;
mod tests_major;
