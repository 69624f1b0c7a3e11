pub mod shopping;
