pub mod ops_auth;
