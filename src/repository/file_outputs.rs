//! File output repository.

use diesel::prelude::*;
use diesel_async::RunQueryDsl;

use super::models::{FileOutputRecord, NewFileOutput};
use super::pool::{DbError, DbPool};
use crate::models::FileOutput;
use crate::schema::file_outputs;

impl From<FileOutputRecord> for FileOutput {
    fn from(record: FileOutputRecord) -> Self {
        FileOutput {
            id: record.id,
            filename: record.filename,
            size: record.size,
            user_id: record.user_id,
            request_id: record.request_id,
        }
    }
}

#[derive(Clone)]
pub struct FileOutputRepository {
    pool: DbPool,
}

impl FileOutputRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Attach an output file to a request.
    pub async fn create(
        &self,
        filename: &str,
        size: i64,
        user_id: i32,
        request_id: i32,
    ) -> Result<FileOutput, DbError> {
        let mut conn = self.pool.get().await?;

        diesel::insert_into(file_outputs::table)
            .values(NewFileOutput {
                filename,
                size,
                user_id,
                request_id,
            })
            .execute(&mut conn)
            .await?;

        file_outputs::table
            .filter(file_outputs::filename.eq(filename))
            .first::<FileOutputRecord>(&mut conn)
            .await
            .map(FileOutput::from)
    }

    pub async fn get_by_filename(&self, filename: &str) -> Result<Option<FileOutput>, DbError> {
        let mut conn = self.pool.get().await?;

        file_outputs::table
            .filter(file_outputs::filename.eq(filename))
            .first::<FileOutputRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(FileOutput::from))
    }

    pub async fn get_for_request(&self, request_id: i32) -> Result<Option<FileOutput>, DbError> {
        let mut conn = self.pool.get().await?;

        file_outputs::table
            .filter(file_outputs::request_id.eq(request_id))
            .first::<FileOutputRecord>(&mut conn)
            .await
            .optional()
            .map(|opt| opt.map(FileOutput::from))
    }

    pub async fn list_for_user(&self, user_id: i32) -> Result<Vec<FileOutput>, DbError> {
        let mut conn = self.pool.get().await?;

        file_outputs::table
            .filter(file_outputs::user_id.eq(user_id))
            .order(file_outputs::id.asc())
            .load::<FileOutputRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(FileOutput::from).collect())
    }

    /// Every file output row, for the orphan sweeper.
    pub async fn list_all(&self) -> Result<Vec<FileOutput>, DbError> {
        let mut conn = self.pool.get().await?;

        file_outputs::table
            .order(file_outputs::id.asc())
            .load::<FileOutputRecord>(&mut conn)
            .await
            .map(|records| records.into_iter().map(FileOutput::from).collect())
    }

    pub async fn delete(&self, id: i32) -> Result<bool, DbError> {
        let mut conn = self.pool.get().await?;

        let rows = diesel::delete(file_outputs::table.find(id))
            .execute(&mut conn)
            .await?;

        Ok(rows > 0)
    }
}
