mod helpers;
mod journal_tests;
mod marks_tests;
