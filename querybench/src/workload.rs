//! Generation of the queries dispatched by the benchmark.

use querybench_protocol::Payload;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::config::Batch;

/// A builder for creating a [`QueryWorkload`].
#[derive(Debug)]
pub struct QueryWorkloadBuilder {
    table: String,
    total_rows: u64,
    page_size: u64,
    seed: u64,
}

impl QueryWorkloadBuilder {
    /// Number of rows in the table; offsets are drawn below this bound.
    pub fn total_rows(mut self, total_rows: u64) -> Self {
        self.total_rows = total_rows;
        self
    }

    /// Number of rows selected by each query.
    pub fn page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Makes the generated queries reproducible.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Creates the workload instance.
    pub fn build(self) -> QueryWorkload {
        QueryWorkload {
            table: self.table,
            total_rows: self.total_rows.max(1),
            page_size: self.page_size,
            rng: SmallRng::seed_from_u64(self.seed),
        }
    }
}

/// An endless source of paginated `SELECT` queries against one table.
#[derive(Debug)]
pub struct QueryWorkload {
    table: String,
    total_rows: u64,
    page_size: u64,
    rng: SmallRng,
}

impl QueryWorkload {
    /// Constructs a new workload builder for the given table.
    pub fn builder(table: impl Into<String>) -> QueryWorkloadBuilder {
        QueryWorkloadBuilder {
            table: table.into(),
            total_rows: 500_000,
            page_size: 100,
            seed: rand::random(),
        }
    }

    /// Builds the workload described by a [`Batch`] configuration.
    pub fn from_config(batch: &Batch) -> Self {
        let mut builder = Self::builder(batch.table.as_str())
            .total_rows(batch.total_rows)
            .page_size(batch.page_size);
        if let Some(seed) = batch.seed {
            builder = builder.seed(seed);
        }
        builder.build()
    }

    /// Returns the next query, selecting one page at a random offset.
    pub fn next_query(&mut self) -> Payload {
        let offset = self.rng.random_range(0..self.total_rows);
        let table = &self.table;
        format!(
            "SELECT {table}.* FROM {table} LIMIT {} OFFSET {offset}",
            self.page_size
        )
        .into()
    }
}
