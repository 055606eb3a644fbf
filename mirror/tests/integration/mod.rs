mod postgres_store_test;
