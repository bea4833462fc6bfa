use jobscheduler::job::query::JobFilter;
use sqlx::{Postgres, QueryBuilder};

use crate::types::{JobStatus, JOB_COLUMNS};

pub(crate) trait ToQuery {
    fn query(&self) -> QueryBuilder<'_, Postgres>;

    fn count_query(&self) -> QueryBuilder<'_, Postgres>;
}

impl ToQuery for JobFilter {
    fn query(&self) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new(format!("SELECT {JOB_COLUMNS} FROM jobs"));
        push_conditions(&mut builder, self);
        builder.push(" ORDER BY created_at DESC LIMIT ");
        builder.push_bind(i64::from(self.limit()));
        builder.push(" OFFSET ");
        builder.push_bind(i64::try_from(self.offset()).unwrap_or(i64::MAX));
        builder
    }

    fn count_query(&self) -> QueryBuilder<'_, Postgres> {
        let mut builder = QueryBuilder::new("SELECT COUNT(*) FROM jobs");
        push_conditions(&mut builder, self);
        builder
    }
}

fn push_conditions<'a>(builder: &mut QueryBuilder<'a, Postgres>, filter: &'a JobFilter) {
    let mut separator = " WHERE";
    if let Some(status) = filter.status {
        builder.push(separator);
        builder.push(" status = ");
        builder.push_bind(JobStatus::from(status));
        separator = " AND";
    }
    if let Some(job_type) = &filter.job_type {
        builder.push(separator);
        builder.push(" job_type = ");
        builder.push_bind(job_type);
    }
}

#[cfg(test)]
mod test {
    use jobscheduler::job::JobStatus;

    use super::*;

    #[test]
    fn to_query_without_conditions() {
        let filter = JobFilter::default();

        assert_eq!(
            filter.query().into_sql(),
            format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC LIMIT $1 OFFSET $2")
        );
        assert_eq!(filter.count_query().into_sql(), "SELECT COUNT(*) FROM jobs");
    }

    #[test]
    fn to_query_with_status_and_job_type() {
        let filter = JobFilter::default()
            .status_equal(JobStatus::Failed)
            .job_type_equal("word_count")
            .page(3);

        assert_eq!(
            filter.query().into_sql(),
            format!(
                "SELECT {JOB_COLUMNS} FROM jobs WHERE status = $1 AND job_type = $2 \
                ORDER BY created_at DESC LIMIT $3 OFFSET $4"
            )
        );
        assert_eq!(
            filter.count_query().into_sql(),
            "SELECT COUNT(*) FROM jobs WHERE status = $1 AND job_type = $2"
        );
    }

    #[test]
    fn to_query_with_job_type_only() {
        let filter = JobFilter::default().job_type_equal("sleep");

        assert_eq!(
            filter.count_query().into_sql(),
            "SELECT COUNT(*) FROM jobs WHERE job_type = $1"
        );
    }
}
