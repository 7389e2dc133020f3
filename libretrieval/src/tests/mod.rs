mod loopback;
mod retrieval;
