
mod test_policy_store;
