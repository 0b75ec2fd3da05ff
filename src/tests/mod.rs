mod test_cleanup_loop;
