pub mod heavymetal;
