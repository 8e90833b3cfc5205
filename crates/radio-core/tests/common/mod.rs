pub mod mock_feed;
